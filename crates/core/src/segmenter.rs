//! Splits a week's reading text into chapters.
//!
//! The text is a markdown document whose second-level headers (`## `) mark
//! sections. Consecutive sections are grouped, `sections_per_chapter` at a
//! time, into chapters. The output is a pure function of the text and the
//! grouping parameter, so completion ordinals stay valid across reloads.

use std::num::NonZeroUsize;

use thiserror::Error;

use crate::model::Chapter;

pub const DEFAULT_SECTIONS_PER_CHAPTER: usize = 2;

const SECTION_MARKER: &str = "## ";
const DEMOTED_MARKER: &str = "### ";
const FALLBACK_TITLE: &str = "Reading";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SegmentError {
    #[error("sections per chapter must be > 0")]
    InvalidGrouping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segmenter {
    sections_per_chapter: NonZeroUsize,
}

impl Default for Segmenter {
    fn default() -> Self {
        Self {
            sections_per_chapter: NonZeroUsize::new(DEFAULT_SECTIONS_PER_CHAPTER)
                .unwrap_or(NonZeroUsize::MIN),
        }
    }
}

struct Section<'a> {
    title: String,
    lines: Vec<&'a str>,
}

impl Segmenter {
    /// # Errors
    ///
    /// Returns `SegmentError::InvalidGrouping` if `sections_per_chapter` is zero.
    pub fn new(sections_per_chapter: usize) -> Result<Self, SegmentError> {
        let sections_per_chapter =
            NonZeroUsize::new(sections_per_chapter).ok_or(SegmentError::InvalidGrouping)?;
        Ok(Self {
            sections_per_chapter,
        })
    }

    #[must_use]
    pub fn sections_per_chapter(&self) -> usize {
        self.sections_per_chapter.get()
    }

    /// Split `raw_text` into an ordered, non-empty chapter list.
    ///
    /// Each chapter takes the title of its first section; section headers are
    /// demoted to `### ` inside the chapter body. Text before the first header
    /// opens the first chapter. Without any header the whole text becomes one
    /// chapter titled `title`.
    #[must_use]
    pub fn segment(&self, title: &str, raw_text: &str) -> Vec<Chapter> {
        let mut preamble: Vec<&str> = Vec::new();
        let mut sections: Vec<Section<'_>> = Vec::new();

        for line in raw_text.lines() {
            if let Some(heading) = line.strip_prefix(SECTION_MARKER) {
                let heading = heading.trim();
                let title = if heading.is_empty() {
                    format!("Section {}", sections.len() + 1)
                } else {
                    heading.to_owned()
                };
                sections.push(Section {
                    title,
                    lines: Vec::new(),
                });
            } else if let Some(open) = sections.last_mut() {
                open.lines.push(line);
            } else {
                preamble.push(line);
            }
        }

        if sections.is_empty() {
            let title = title.trim();
            return vec![Chapter {
                ordinal: 0,
                title: if title.is_empty() {
                    FALLBACK_TITLE.to_owned()
                } else {
                    title.to_owned()
                },
                body: raw_text.to_owned(),
            }];
        }

        let preamble = preamble.join("\n");
        let preamble = preamble.trim();

        sections
            .chunks(self.sections_per_chapter.get())
            .enumerate()
            .map(|(ordinal, group)| {
                let mut parts: Vec<String> = Vec::with_capacity(group.len() + 1);
                if ordinal == 0 && !preamble.is_empty() {
                    parts.push(preamble.to_owned());
                }
                parts.extend(group.iter().map(render_section));
                Chapter {
                    ordinal: u32::try_from(ordinal).unwrap_or(u32::MAX),
                    title: group[0].title.clone(),
                    body: parts.join("\n\n"),
                }
            })
            .collect()
    }
}

fn render_section(section: &Section<'_>) -> String {
    let body = section.lines.join("\n");
    let body = body.trim();
    if body.is_empty() {
        format!("{DEMOTED_MARKER}{}", section.title)
    } else {
        format!("{DEMOTED_MARKER}{}\n\n{body}", section.title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn doc(sections: usize) -> String {
        (1..=sections)
            .map(|i| format!("## Part {i}\nBody of part {i}.\n"))
            .collect()
    }

    #[test]
    fn four_sections_make_two_chapters() {
        let chapters = Segmenter::default().segment("Week 1", &doc(4));
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].title, "Part 1");
        assert_eq!(chapters[1].title, "Part 3");
        assert!(chapters[0].body.contains("### Part 2"));
        assert!(!chapters[0].body.contains("Part 3"));
    }

    #[test]
    fn five_sections_make_two_two_one() {
        let chapters = Segmenter::default().segment("Week 1", &doc(5));
        let sizes: Vec<usize> = chapters
            .iter()
            .map(|c| c.body.matches("### ").count())
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        let ordinals: Vec<u32> = chapters.iter().map(|c| c.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1, 2]);
    }

    #[test]
    fn section_headers_are_demoted() {
        let chapters = Segmenter::default().segment("T", "## Alpha\ntext\n## Beta\nmore");
        assert_eq!(chapters[0].body, "### Alpha\n\ntext\n\n### Beta\n\nmore");
    }

    #[test]
    fn text_without_headers_falls_back_to_single_chapter() {
        let raw = "# Title\n\nJust one block of prose.\n### not a section";
        let chapters = Segmenter::default().segment("Storage Basics", raw);
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].title, "Storage Basics");
        assert_eq!(chapters[0].body, raw);
    }

    #[test]
    fn blank_title_fallback_still_names_the_chapter() {
        let chapters = Segmenter::default().segment("  ", "");
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].title, FALLBACK_TITLE);
    }

    #[test]
    fn preamble_opens_first_chapter() {
        let raw = "# Week overview\nIntro line\n## One\na\n## Two\nb\n## Three\nc";
        let chapters = Segmenter::default().segment("W", raw);
        assert_eq!(chapters.len(), 2);
        assert!(chapters[0].body.starts_with("# Week overview\nIntro line"));
        assert_eq!(chapters[0].title, "One");
    }

    #[test]
    fn deeper_headers_stay_in_the_section_body() {
        let raw = "## One\n### detail\ntext\n## Two\nb";
        let chapters = Segmenter::new(1).unwrap().segment("W", raw);
        assert_eq!(chapters.len(), 2);
        assert!(chapters[0].body.contains("### detail"));
    }

    #[test]
    fn zero_grouping_is_rejected() {
        assert_eq!(Segmenter::new(0), Err(SegmentError::InvalidGrouping));
        assert_eq!(Segmenter::default().sections_per_chapter(), 2);
    }

    #[test]
    fn crlf_input_matches_lf_input() {
        let lf = doc(3);
        let crlf = lf.replace('\n', "\r\n");
        let seg = Segmenter::default();
        assert_eq!(seg.segment("W", &lf), seg.segment("W", &crlf));
    }

    proptest! {
        #[test]
        fn prop_segmentation_is_deterministic(text in "(## [a-z]{0,6}\n|[a-z ]{0,12}\n){0,20}", k in 1usize..5) {
            let seg = Segmenter::new(k).unwrap();
            let first = seg.segment("Title", &text);
            let second = seg.segment("Title", &text);
            prop_assert!(!first.is_empty());
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_chapter_count_is_ceil_of_sections(sections in 1usize..30, k in 1usize..6) {
            let chapters = Segmenter::new(k).unwrap().segment("T", &doc(sections));
            prop_assert_eq!(chapters.len(), sections.div_ceil(k));
        }
    }
}
