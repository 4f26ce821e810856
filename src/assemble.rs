use crate::model::PageText;

pub const ERROR_PAGE_PLACEHOLDER: &str = "[error processing page]";

pub fn page_marker(page: usize) -> String {
    format!("--- Page {page} ---")
}

/// Renders pages in the order given, each preceded by `\n--- Page N ---\n`.
///
/// The marker text is what `PageIndex::build` scans for; change both together.
pub fn assemble<'a, I>(pages: I) -> String
where
    I: IntoIterator<Item = (usize, &'a str)>,
{
    let mut assembled = String::new();
    for (number, text) in pages {
        assembled.push('\n');
        assembled.push_str(&page_marker(number));
        assembled.push('\n');
        assembled.push_str(text);
    }
    assembled
}

pub fn assemble_pages(pages: &[PageText]) -> String {
    assemble(pages.iter().map(|page| (page.number, page.text.as_str())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assemble_prefixes_every_page_with_its_marker() {
        let text = assemble([(1, "alpha"), (2, ""), (3, "gamma")]);
        assert_eq!(
            text,
            "\n--- Page 1 ---\nalpha\n--- Page 2 ---\n\n--- Page 3 ---\ngamma"
        );
    }

    #[test]
    fn assemble_of_nothing_is_empty() {
        assert_eq!(assemble(std::iter::empty::<(usize, &str)>()), "");
    }
}
