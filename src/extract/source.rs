use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageDimensions {
    pub width: f64,
    pub height: f64,
}

impl PageDimensions {
    pub fn longest_side(self) -> f64 {
        self.width.max(self.height)
    }
}

pub trait Rasterizer {
    fn render_page(&self, page: usize, dpi: u32) -> Result<Vec<u8>>;
}

/// One opened paginated document. Pages are 1-based.
pub trait DocumentSource: Rasterizer + Sync {
    fn page_count(&self) -> usize;

    fn native_text(&self, page: usize) -> Result<String>;

    fn page_dimensions(&self, page: usize) -> Result<PageDimensions>;
}

/// PDF access through the poppler command-line tools.
#[derive(Debug)]
pub struct PopplerDocument {
    path: PathBuf,
    dimensions: Vec<PageDimensions>,
}

impl PopplerDocument {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            bail!("document not found: {}", path.display());
        }
        for tool in ["pdfinfo", "pdftotext", "pdftoppm"] {
            if !command_available(tool) {
                bail!("required tool {tool} is not installed (poppler-utils)");
            }
        }

        let summary = run_tool(Command::new("pdfinfo").arg(path), "pdfinfo", path)?;
        let page_count = parse_page_count(&summary)
            .with_context(|| format!("pdfinfo reported no page count for {}", path.display()))?;

        let mut dimensions = vec![
            PageDimensions {
                width: 612.0,
                height: 792.0,
            };
            page_count
        ];
        if page_count > 0 {
            let per_page = run_tool(
                Command::new("pdfinfo")
                    .arg("-f")
                    .arg("1")
                    .arg("-l")
                    .arg(page_count.to_string())
                    .arg(path),
                "pdfinfo",
                path,
            )?;
            for (page, size) in parse_page_sizes(&per_page)? {
                if let Some(slot) = page.checked_sub(1).and_then(|index| dimensions.get_mut(index)) {
                    *slot = size;
                }
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            dimensions,
        })
    }

    fn check_page(&self, page: usize) -> Result<()> {
        if page == 0 || page > self.dimensions.len() {
            bail!(
                "page {} out of range for {} ({} pages)",
                page,
                self.path.display(),
                self.dimensions.len()
            );
        }
        Ok(())
    }
}

impl Rasterizer for PopplerDocument {
    fn render_page(&self, page: usize, dpi: u32) -> Result<Vec<u8>> {
        self.check_page(page)?;

        let stem = self
            .path
            .file_stem()
            .and_then(|value| value.to_str())
            .unwrap_or("pdf");
        let safe_stem = stem
            .chars()
            .map(|character| {
                if character.is_ascii_alphanumeric() {
                    character
                } else {
                    '_'
                }
            })
            .collect::<String>();

        let stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let output_root = std::env::temp_dir().join(format!(
            "folio_raster_{}_{}_{}_{}",
            safe_stem,
            std::process::id(),
            page,
            stamp
        ));
        let png_path = PathBuf::from(format!("{}.png", output_root.display()));

        let output = Command::new("pdftoppm")
            .arg("-f")
            .arg(page.to_string())
            .arg("-l")
            .arg(page.to_string())
            .arg("-r")
            .arg(dpi.to_string())
            .arg("-singlefile")
            .arg("-png")
            .arg(&self.path)
            .arg(&output_root)
            .output()
            .with_context(|| format!("failed to execute pdftoppm for {}", self.path.display()))?;

        if !output.status.success() {
            let _ = fs::remove_file(&png_path);
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "pdftoppm returned non-zero exit status for {} page {}: {}",
                self.path.display(),
                page,
                stderr.trim()
            );
        }

        let bytes = fs::read(&png_path).with_context(|| {
            format!(
                "pdftoppm did not produce expected image for {} page {}",
                self.path.display(),
                page
            )
        });
        let _ = fs::remove_file(&png_path);
        bytes
    }
}

impl DocumentSource for PopplerDocument {
    fn page_count(&self) -> usize {
        self.dimensions.len()
    }

    fn native_text(&self, page: usize) -> Result<String> {
        self.check_page(page)?;

        let raw = run_tool(
            Command::new("pdftotext")
                .arg("-enc")
                .arg("UTF-8")
                .arg("-f")
                .arg(page.to_string())
                .arg("-l")
                .arg(page.to_string())
                .arg(&self.path)
                .arg("-"),
            "pdftotext",
            &self.path,
        )?;

        Ok(raw.replace(['\u{000C}', '\u{0000}'], ""))
    }

    fn page_dimensions(&self, page: usize) -> Result<PageDimensions> {
        self.check_page(page)?;
        Ok(self.dimensions[page - 1])
    }
}

pub fn command_available(program: &str) -> bool {
    Command::new(program).arg("-v").output().is_ok()
}

fn run_tool(command: &mut Command, program: &str, path: &Path) -> Result<String> {
    let output = command
        .output()
        .with_context(|| format!("failed to execute {} for {}", program, path.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "{} returned non-zero exit status for {}: {}",
            program,
            path.display(),
            stderr.trim()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn parse_page_count(summary: &str) -> Option<usize> {
    summary.lines().find_map(|line| {
        line.strip_prefix("Pages:")
            .and_then(|value| value.trim().parse::<usize>().ok())
    })
}

fn parse_page_sizes(report: &str) -> Result<Vec<(usize, PageDimensions)>> {
    let pattern = Regex::new(r"(?m)^Page\s+(\d+)\s+size:\s+([0-9.]+)\s+x\s+([0-9.]+)")
        .context("failed to compile pdfinfo page size regex")?;

    let mut sizes = Vec::new();
    for captures in pattern.captures_iter(report) {
        let page = captures
            .get(1)
            .and_then(|value| value.as_str().parse::<usize>().ok());
        let width = captures
            .get(2)
            .and_then(|value| value.as_str().parse::<f64>().ok());
        let height = captures
            .get(3)
            .and_then(|value| value.as_str().parse::<f64>().ok());
        if let (Some(page), Some(width), Some(height)) = (page, width, height) {
            sizes.push((page, PageDimensions { width, height }));
        }
    }
    Ok(sizes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_page_count_reads_pdfinfo_summary() {
        let summary = "Title:          Report\nPages:          42\nEncrypted:      no\n";
        assert_eq!(parse_page_count(summary), Some(42));
        assert_eq!(parse_page_count("Title: x\n"), None);
    }

    #[test]
    fn parse_page_sizes_reads_per_page_lines() {
        let report = "Pages:          2\n\
                      Page    1 size: 612 x 792 pts (letter)\n\
                      Page    1 rot:  0\n\
                      Page    2 size: 1190.55 x 841.89 pts (A3)\n";
        let sizes = parse_page_sizes(report).unwrap();

        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[0].0, 1);
        assert_eq!(sizes[0].1.longest_side(), 792.0);
        assert_eq!(sizes[1].0, 2);
        assert!((sizes[1].1.longest_side() - 1190.55).abs() < 1e-9);
    }

    #[test]
    fn open_missing_document_fails() {
        let error = PopplerDocument::open(Path::new("/nonexistent/folio/missing.pdf")).unwrap_err();
        assert!(error.to_string().contains("document not found"));
    }
}
