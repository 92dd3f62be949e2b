/// Live text of a reply that is still streaming.
///
/// Splits the text into the part already on screen and the newest fragment so
/// a renderer can fade the latter in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseView {
    text: Option<String>,
    previous_length: usize,
}

impl ResponseView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, fragment: &str) {
        let text = self.text.get_or_insert_with(String::new);
        self.previous_length = text.len();
        text.push_str(fragment);
    }

    /// True until the first fragment arrives.
    pub fn is_waiting(&self) -> bool {
        self.text.is_none()
    }

    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }

    pub fn settled(&self) -> &str {
        &self.text()[..self.previous_length]
    }

    pub fn fresh(&self) -> &str {
        &self.text()[self.previous_length..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waits_until_the_first_fragment() {
        let mut view = ResponseView::new();
        assert!(view.is_waiting());
        assert_eq!(view.text(), "");

        view.append("");
        assert!(!view.is_waiting());
    }

    #[test]
    fn newest_fragment_is_kept_apart_from_settled_text() {
        let mut view = ResponseView::new();
        view.append("Hel");
        assert_eq!((view.settled(), view.fresh()), ("", "Hel"));

        view.append("lo ");
        view.append("wörld");
        assert_eq!(view.settled(), "Hello ");
        assert_eq!(view.fresh(), "wörld");
        assert_eq!(view.text(), "Hello wörld");
    }
}
