use anyhow::{anyhow, bail, Context, Result};
use lopdf::Document as PdfDocument;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub title: String,
    pub content: String,
    pub pages: Option<usize>,
}

/// Extracts plain text from an uploaded file held in memory.
pub struct DocumentParser;

impl DocumentParser {
    pub fn parse(file_name: &str, data: &[u8]) -> Result<ParsedDocument> {
        let (stem, extension) = match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem, ext.to_lowercase()),
            _ => return Err(anyhow!("file '{}' has no extension", file_name)),
        };

        let (content, pages) = match extension.as_str() {
            "pdf" => Self::parse_pdf(data)?,
            "txt" | "md" | "markdown" => (String::from_utf8_lossy(data).into_owned(), None),
            other => bail!("unsupported file type '.{}'", other),
        };

        if content.trim().is_empty() {
            bail!("'{}' contains no extractable text", file_name);
        }

        debug!("Parsed {} characters from {}", content.len(), file_name);
        Ok(ParsedDocument {
            title: stem.to_string(),
            content,
            pages,
        })
    }

    fn parse_pdf(data: &[u8]) -> Result<(String, Option<usize>)> {
        let doc = PdfDocument::load_mem(data).context("Failed to load PDF")?;
        let pages = doc.get_pages();

        let mut content = String::new();
        for page_num in pages.keys() {
            match doc.extract_text(&[*page_num]) {
                Ok(text) => {
                    content.push_str(&text);
                    content.push('\n');
                }
                Err(e) => warn!("Failed to extract text from page {}: {}", page_num, e),
            }
        }

        Ok((content, Some(pages.len())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_and_markdown() {
        let doc = DocumentParser::parse("ivf-notes.md", b"# Stimulation\nFSH daily.").unwrap();
        assert_eq!(doc.title, "ivf-notes");
        assert!(doc.content.contains("FSH daily."));
        assert_eq!(doc.pages, None);

        let doc = DocumentParser::parse("Handbook.v2.TXT", b"Embryo grading").unwrap();
        assert_eq!(doc.title, "Handbook.v2");
    }

    #[test]
    fn test_rejects_unknown_and_empty_files() {
        assert!(DocumentParser::parse("slides.pptx", b"data").is_err());
        assert!(DocumentParser::parse("README", b"data").is_err());
        assert!(DocumentParser::parse("blank.txt", b"  \n ").is_err());
    }

    #[test]
    fn test_corrupt_pdf_is_an_error() {
        let err = DocumentParser::parse("book.pdf", b"not a pdf").unwrap_err();
        assert!(err.to_string().contains("Failed to load PDF"));
    }
}
