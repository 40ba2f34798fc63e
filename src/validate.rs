//! Decides whether raw OCR strings are plausible plate numbers.
//!
//! A cleaned string is a plate candidate when it is exactly one province
//! prefix, one uppercase issuing-authority letter and a 4-7 character
//! alphanumeric tail, optionally broken by a single new-energy joiner glyph.

use log::debug;

use crate::{NotFoundReason, PlateResult, TextCandidate, PROVINCE_PREFIXES};

// 新能源车牌分隔符，不同 OCR 引擎给出的字形不一样
const JOINERS: [char; 3] = ['·', '•', '・'];

/// How format matches are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// Pick the best-confidence format match. This is the behavior the
    /// recognition variants agree on and the default.
    SelectMatches,
    /// Compatibility mode for a divergent variant that deletes format matches
    /// from its output instead of selecting them. Always reports `NotFound`,
    /// carrying the stripped remainders for display.
    StripMatches,
}

/// Keep only CJK ideographs, ASCII alphanumerics and joiner glyphs; OCR
/// punctuation and confidence artifacts are dropped.
pub fn clean_text(raw: &str) -> String {
    raw.chars()
        .filter(|&c| is_cjk(c) || c.is_ascii_alphanumeric() || is_joiner(c))
        .collect()
}

fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}

fn is_joiner(c: char) -> bool {
    JOINERS.contains(&c)
}

/// First-character membership in the literal 31-entry province table. No CJK
/// range inference: characters outside the table never qualify.
pub fn has_province_prefix(cleaned: &str) -> bool {
    cleaned
        .chars()
        .next()
        .map_or(false, |c| PROVINCE_PREFIXES.contains(&c))
}

/// Whether a cleaned string matches the plate format rule.
pub fn is_plate_format(cleaned: &str) -> bool {
    let mut chars = cleaned.chars();
    match chars.next() {
        Some(c) if PROVINCE_PREFIXES.contains(&c) => {}
        _ => return false,
    }
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() => {}
        _ => return false,
    }

    let tail: Vec<char> = chars.collect();
    let mut alphanumeric = 0usize;
    let mut joiners = 0usize;
    for (i, &c) in tail.iter().enumerate() {
        if c.is_ascii_uppercase() || c.is_ascii_digit() {
            alphanumeric += 1;
        } else if is_joiner(c) {
            // at most one joiner; it separates groups, so it may not trail
            if i == tail.len() - 1 {
                return false;
            }
            joiners += 1;
        } else {
            return false;
        }
    }
    joiners <= 1 && (4..=7).contains(&alphanumeric)
}

/// Filter the candidates against the plate format rule and produce the
/// terminal pipeline result. Strictly-greater confidence comparison, so equal
/// or missing confidences deterministically keep the earliest match.
pub fn validate(candidates: &[TextCandidate], mode: ValidationMode) -> PlateResult {
    if candidates.is_empty() {
        return PlateResult::NotFound {
            reason: NotFoundReason::NoOcrText,
            raw_texts: Vec::new(),
        };
    }

    match mode {
        ValidationMode::SelectMatches => {
            let mut best: Option<(&TextCandidate, String)> = None;
            for candidate in candidates {
                let cleaned = clean_text(&candidate.text);
                if !is_plate_format(&cleaned) {
                    continue;
                }
                debug!("format match {:?} (confidence {})", cleaned, candidate.confidence);
                let better = match &best {
                    Some((current, _)) => candidate.confidence > current.confidence,
                    None => true,
                };
                if better {
                    best = Some((candidate, cleaned));
                }
            }
            match best {
                Some((candidate, plate)) => PlateResult::Recognized {
                    plate,
                    region: candidate.bounding_box,
                    confidence: candidate.confidence,
                },
                None => PlateResult::NotFound {
                    reason: NotFoundReason::NoFormatMatch,
                    raw_texts: candidates.iter().map(|c| c.text.clone()).collect(),
                },
            }
        }
        ValidationMode::StripMatches => {
            let stripped = candidates
                .iter()
                .map(|candidate| {
                    let cleaned = clean_text(&candidate.text);
                    if is_plate_format(&cleaned) {
                        String::new()
                    } else {
                        cleaned
                    }
                })
                .filter(|text| !text.is_empty())
                .collect();
            PlateResult::NotFound {
                reason: NotFoundReason::NoFormatMatch,
                raw_texts: stripped,
            }
        }
    }
}
