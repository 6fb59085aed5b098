//! The content plan consumed by the refinement engine. Produced upstream and
//! read-only here.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

/// A reference document named by a key point.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperRef {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub year: Option<u32>,
    /// Where the full text can be fetched from.
    #[serde(default, alias = "locator")]
    pub url: String,
    #[serde(default, alias = "abstract")]
    pub summary: String,
    #[serde(default)]
    pub citation_reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPoint {
    pub text: String,
    #[serde(default)]
    pub papers: Vec<PaperRef>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionPlan {
    #[serde(default)]
    pub number: u32,
    pub title: String,
    #[serde(default)]
    pub outline: String,
    pub key_points: Vec<KeyPoint>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(alias = "plan")]
    pub sections: Vec<SectionPlan>,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("section {0} has no key points")]
    EmptySection(usize),
    #[error("section {section}, key point {key_point} lists paper '{paper_id}' more than once")]
    DuplicatePaper {
        section: usize,
        key_point: usize,
        paper_id: String,
    },
    #[error("section {section}, key point {key_point} has a paper with an empty id")]
    MissingPaperId { section: usize, key_point: usize },
}

impl Plan {
    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    pub fn section(&self, index: usize) -> Option<&SectionPlan> {
        self.sections.get(index)
    }

    pub fn key_point(&self, section: usize, subsection: usize) -> Option<&KeyPoint> {
        self.sections.get(section)?.key_points.get(subsection)
    }

    /// Number of subsections (one per key point) in each section.
    pub fn subsections_per_section(&self) -> BTreeMap<usize, usize> {
        self.sections
            .iter()
            .enumerate()
            .map(|(i, s)| (i, s.key_points.len()))
            .collect()
    }

    /// Reject plans the engine cannot walk: empty sections would leave the
    /// pointer on a subsection that does not exist.
    pub fn validate(&self) -> Result<(), PlanError> {
        for (s_idx, section) in self.sections.iter().enumerate() {
            if section.key_points.is_empty() {
                return Err(PlanError::EmptySection(s_idx));
            }
            for (k_idx, key_point) in section.key_points.iter().enumerate() {
                let mut seen = HashSet::new();
                for paper in &key_point.papers {
                    if paper.id.trim().is_empty() {
                        return Err(PlanError::MissingPaperId {
                            section: s_idx,
                            key_point: k_idx,
                        });
                    }
                    if !seen.insert(paper.id.as_str()) {
                        return Err(PlanError::DuplicatePaper {
                            section: s_idx,
                            key_point: k_idx,
                            paper_id: paper.id.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn subsections_per_section_counts_key_points() {
        let p = plan(&[2, 1, 3]);
        let counts = p.subsections_per_section();
        assert_eq!(counts.get(&0), Some(&2));
        assert_eq!(counts.get(&1), Some(&1));
        assert_eq!(counts.get(&2), Some(&3));
        assert_eq!(p.section_count(), 3);
    }

    #[test]
    fn key_point_lookup() {
        let p = plan(&[2]);
        assert_eq!(p.key_point(0, 1).unwrap().text, "key point 0.1");
        assert!(p.key_point(0, 2).is_none());
        assert!(p.key_point(1, 0).is_none());
    }

    #[test]
    fn validate_rejects_empty_section() {
        let p = plan(&[1, 0]);
        assert_eq!(p.validate(), Err(PlanError::EmptySection(1)));
    }

    #[test]
    fn validate_rejects_duplicate_paper() {
        let mut p = plan(&[1]);
        p.sections[0].key_points[0].papers.push(paper("p00"));
        assert!(matches!(p.validate(), Err(PlanError::DuplicatePaper { .. })));
    }

    #[test]
    fn deserializes_upstream_field_names() {
        let json = r#"{
            "plan": [{
                "title": "Background",
                "key_points": [{
                    "text": "Attention replaces recurrence",
                    "papers": [{"id": "1706.03762", "title": "Attention Is All You Need",
                                "year": 2017, "locator": "https://arxiv.org/abs/1706.03762",
                                "abstract": "The dominant sequence transduction models..."}]
                }]
            }]
        }"#;
        let p: Plan = serde_json::from_str(json).unwrap();
        assert_eq!(p.section_count(), 1);
        let paper = &p.sections[0].key_points[0].papers[0];
        assert_eq!(paper.url, "https://arxiv.org/abs/1706.03762");
        assert!(paper.summary.starts_with("The dominant"));
        assert!(p.validate().is_ok());
    }
}
