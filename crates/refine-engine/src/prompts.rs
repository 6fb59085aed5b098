//! Prompt text for every generation and judgment call, plus the feedback
//! messages a revision appends to the transcript.

use std::fmt::Write as _;

use refine_core::survey::{
    CitationClaim, ContentReview, ContentTree, GroundingReview, PaperEvidence, Section, Subsection,
};
use refine_retrieval::search_tool::TOOL_NAME;

pub const WRITER_SYSTEM_PROMPT: &str = "\
You are an expert academic writer producing one subsection of a literature survey at a time. \
Write precise, well organised scholarly prose that synthesises the supplied papers instead of \
summarising them one after another. Every factual statement taken from a paper must carry a \
citation to that paper, and you may only cite the papers you are given.";

pub const REVIEWER_SYSTEM_PROMPT: &str = "\
You are a meticulous reviewer of academic writing. You answer with a single JSON object in \
exactly the requested format and nothing else.";

const CITATION_FORMAT: &str = "\
Citation format:
- One author: [Author_LastName_YEAR], e.g. [Smith_2023]
- Several authors: [FirstAuthor_et_al_YEAR], e.g. [Vaswani_et_al_2017]
- Several papers: separate with semicolons, e.g. [Smith_2023; Johnson_2022]
- Use \"Unknown\" as the name when a paper lists no authors";

/// Everything the drafting prompt is built from.
pub struct DraftingInput<'a> {
    pub key_point: &'a str,
    pub section_index: usize,
    pub section_title: &'a str,
    pub section_outline: &'a str,
    pub subsection_index: usize,
    pub total_subsections: usize,
    pub preceding: String,
    pub papers: &'a [PaperEvidence],
}

/// Completed prose before `(section, subsection)`, in plan order.
pub fn preceding_content(tree: &ContentTree, section: usize, subsection: usize) -> String {
    let mut out = String::new();
    for s in tree.sections.iter().take(section + 1) {
        let limit = if s.index == section { subsection } else { s.subsections.len() };
        let written: Vec<&Subsection> = s
            .subsections
            .iter()
            .take(limit)
            .filter(|sub| !sub.content.trim().is_empty())
            .collect();
        if written.is_empty() && s.introduction.trim().is_empty() {
            continue;
        }
        section_heading(&mut out, s);
        for sub in written {
            let _ = writeln!(
                out,
                "**Subsection {}.{}: {}**\n{}\n",
                s.index + 1,
                sub.index + 1,
                sub.title,
                sub.content.trim()
            );
        }
    }
    out
}

fn section_heading(out: &mut String, section: &Section) {
    let _ = writeln!(out, "**Section {}: {}**", section.index + 1, section.title);
    if !section.introduction.trim().is_empty() {
        let _ = writeln!(out, "{}\n", section.introduction.trim());
    }
}

/// One block per paper: title, authors, id, citation and retrieved fragments.
pub fn paper_blocks(papers: &[PaperEvidence]) -> String {
    let mut out = String::new();
    for (i, paper) in papers.iter().enumerate() {
        let authors = paper.author_last_names();
        let authors = if authors.is_empty() {
            "Unknown".to_string()
        } else {
            authors.join(", ")
        };
        let _ = writeln!(out, "**Paper {}: {}**", i + 1, paper.title);
        let _ = writeln!(out, "**Authors**: {authors}");
        let _ = writeln!(out, "**ID**: {}", paper.id);
        let _ = writeln!(out, "**Citation**: {}", paper.citation);
        let _ = writeln!(out, "**Relevant Segments**:");
        for (j, segment) in paper.formatted_segments().iter().enumerate() {
            let _ = writeln!(out, "- Fragment {}: {segment}", j + 1);
        }
        out.push('\n');
    }
    out
}

pub fn drafting_prompt(input: &DraftingInput<'_>) -> String {
    let preceding = if input.preceding.trim().is_empty() {
        "(This is the first subsection of the survey.)".to_string()
    } else {
        input.preceding.trim_end().to_string()
    };
    let outline = if input.section_outline.trim().is_empty() {
        "(no outline given)"
    } else {
        input.section_outline.trim()
    };
    format!(
        "Write the next subsection of the survey.\n\n\
         ## Previously written content\n{preceding}\n\n\
         ## Key point\nThe subsection must develop this key point:\n{key_point}\n\n\
         ## Section context\n\
         Section {section_number}: {section_title}\n\
         Outline: {outline}\n\
         This is subsection {position} of {total} in the section.\n\n\
         ## Papers\n{papers}\
         ## Instructions\n\
         - Build the argument around the key point and connect it to the previous content.\n\
         - Ground every claim in the fragments above. If a claim needs more support, call the \
         `{tool}` tool to search a paper before writing it.\n\
         - Cite only the papers listed above.\n\n\
         {citation_format}\n\n\
         Return 2 to 4 paragraphs of Markdown prose (roughly 150 to 300 words each) with no \
         heading and no commentary.",
        key_point = input.key_point,
        section_number = input.section_index + 1,
        section_title = input.section_title,
        position = input.subsection_index + 1,
        total = input.total_subsections,
        papers = paper_blocks(input.papers),
        tool = TOOL_NAME,
        citation_format = CITATION_FORMAT,
    )
}

pub fn content_review_prompt(key_point: &str, content: &str) -> String {
    format!(
        "Review the quality of this survey subsection.\n\n\
         ## Key point it must address\n{key_point}\n\n\
         ## Subsection\n{content}\n\n\
         Score it from 1 to 10 on clarity, concision, flow, grammar, precision and academic \
         style, and on how well it addresses the key point. List every concrete problem with \
         the exact text it concerns. The error_type of each problem must be one of: clarity, \
         conciseness, flow, grammar, vagueness, style, accuracy.\n\n\
         Respond with this JSON object:\n\
         {{\n\
           \"overall_assessment\": {{\"score\": <1-10>, \"meets_minimum\": <bool>, \"reasoning\": \"...\"}},\n\
           \"fine_grained_results\": [\n\
             {{\"reviewed_text\": \"...\", \"error_type\": \"...\", \"explanation\": \"...\", \"correction_suggestion\": \"...\"}}\n\
           ]\n\
         }}"
    )
}

/// Papers as `- **id**: title (authors, year)` lines for extraction.
fn paper_index(papers: &[PaperEvidence]) -> String {
    let mut out = String::new();
    for paper in papers {
        let authors = paper.author_last_names();
        let authors = if authors.is_empty() {
            "Unknown".to_string()
        } else {
            authors.join(", ")
        };
        let year = paper.year.map_or_else(|| "n.d.".to_string(), |y| y.to_string());
        let _ = writeln!(out, "- **{}**: {} ({authors}, {year})", paper.id, paper.title);
    }
    out
}

pub fn extraction_prompt(content: &str, papers: &[PaperEvidence]) -> String {
    format!(
        "Find every citation in the text below and the claim each one is used to support.\n\n\
         ## Text\n{content}\n\n\
         ## Papers available to this text\n{index}\n\
         Map each citation marker to the ids of the papers it refers to, using the author names \
         and years above. If a marker matches none of the listed papers, report the identifier \
         you would expect for it anyway; do not drop it. A marker naming several papers is one \
         entry with several ids.\n\n\
         Respond with this JSON object:\n\
         {{\n\
           \"citation_claims\": [\n\
             {{\"citation\": \"[Smith_2023]\", \"cited_papers\": [\"<paper id>\"], \
         \"supported_claim\": \"the claim the citation backs\", \"context\": \"the full sentence\"}}\n\
           ]\n\
         }}",
        index = paper_index(papers),
    )
}

pub fn verification_prompt(claim: &CitationClaim, papers: &[&PaperEvidence]) -> String {
    let mut evidence = String::new();
    for paper in papers {
        let _ = writeln!(evidence, "### {} ({})", paper.title, paper.id);
        for (j, segment) in paper.formatted_segments().iter().enumerate() {
            let _ = writeln!(evidence, "- Fragment {}: {segment}", j + 1);
        }
        evidence.push('\n');
    }
    format!(
        "Check whether a citation in a survey is supported by the paper it cites.\n\n\
         ## Citation\n{citation}\n\n\
         ## Claim attributed to it\n{claim_text}\n\n\
         ## Sentence\n{context}\n\n\
         ## Evidence from the cited paper(s)\n{evidence}\
         Use the `{tool}` tool to search the cited paper(s) when the fragments are not enough to \
         decide.\n\n\
         A claim is valid only if the paper supports it as stated. Otherwise classify the \
         problem as one of: misrepresentation, hallucination, overstatement, out_of_context, \
         unsupported.\n\n\
         Respond with this JSON object:\n\
         {{\"status\": \"valid\" | \"invalid\", \"error_type\": <null or one of the classes>, \
         \"explanation\": \"...\", \"correction_suggestion\": \"...\"}}",
        citation = claim.citation,
        claim_text = claim.supported_claim,
        context = if claim.context.trim().is_empty() {
            claim.supported_claim.as_str()
        } else {
            claim.context.as_str()
        },
        tool = TOOL_NAME,
    )
}

/// Revision request built from a failed content review.
pub fn content_feedback(review: &ContentReview, minimum_score: u8) -> String {
    let mut issues = String::new();
    for (i, issue) in review.issues.iter().enumerate() {
        let _ = writeln!(issues, "{}. **{}**: {}", i + 1, issue.category, issue.explanation);
        if !issue.span.trim().is_empty() {
            let _ = writeln!(issues, "   - Problematic text: \"{}\"", issue.span.trim());
        }
        if !issue.suggestion.trim().is_empty() {
            let _ = writeln!(issues, "   - Suggestion: {}", issue.suggestion.trim());
        }
    }
    if issues.is_empty() {
        issues.push_str("(no individual issues listed)\n");
    }
    format!(
        "The subsection did not pass the quality review (score {score}/10, minimum \
         {minimum_score}).\n\n\
         Reviewer assessment: {reasoning}\n\n\
         Issues:\n{issues}\n\
         Rewrite the subsection to fix every issue while keeping correct citations. Return only \
         the revised subsection text.",
        score = review.score,
        reasoning = review.reasoning.trim(),
    )
}

/// Revision request built from a failed grounding review. Lists only the
/// invalid citations, then the papers that may be cited.
pub fn grounding_feedback(review: &GroundingReview, papers: &[PaperEvidence]) -> String {
    let mut issues = String::new();
    for (i, result) in review.results.iter().filter(|r| r.is_invalid()).enumerate() {
        let kind = result
            .error_type
            .map_or_else(|| "unsupported".to_string(), |e| e.to_string());
        let _ = writeln!(issues, "{}. **{kind}** for citation {}", i + 1, result.citation);
        let _ = writeln!(issues, "   - Claim: \"{}\"", result.supported_claim.trim());
        let _ = writeln!(issues, "   - Problem: {}", result.explanation.trim());
        let _ = writeln!(issues, "   - Suggestion: {}", result.correction_suggestion.trim());
        let mut ids: Vec<&str> = result.paper_ids.iter().map(String::as_str).collect();
        ids.extend(result.hallucinated_ids.iter().map(String::as_str));
        let ids = if ids.is_empty() { "N/A".to_string() } else { ids.join(", ") };
        let _ = writeln!(issues, "   - Paper IDs: {ids}");
    }

    let mut available = String::new();
    for paper in papers {
        let _ = writeln!(available, "- **{}**: {}", paper.id, paper.title);
    }

    format!(
        "Some citations in the subsection are not supported by their sources.\n\n\
         Issues:\n{issues}\n\
         Papers you may cite:\n{available}\n\
         Use the `{TOOL_NAME}` tool to find supporting text in these papers. Correct or remove \
         every problematic claim, never cite a paper outside this list, and return only the \
         revised subsection text."
    )
}
