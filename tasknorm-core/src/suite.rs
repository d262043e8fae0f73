//! Run and suite name parsing
//!
//! Composite test identifiers like `mochitest-plain-clipboard-e10s-3`
//! pack suite, flavor, run-type flags and a chunk number into one string.
//! This module unpacks them with an ordered set of stripping rules, then
//! reconciles the parsed chunk and suite against their side-channel
//! encodings through the coalescer.

use std::collections::BTreeSet;

use crate::coalesce::Coalescer;
use crate::domain::SuiteInfo;
use crate::error::NormalizeError;

/// Raw inputs for one suite parse, all side channels included
#[derive(Debug, Default)]
pub struct SuiteInput {
    /// Task metadata name, e.g. `mochitest-plain-clipboard-e10s-3`
    pub metadata_name: Option<String>,
    /// Declared suite name (`extra.suite.name`)
    pub suite_name: Option<String>,
    /// Declared flavor (`extra.suite.flavor`)
    pub flavor: Option<String>,
    /// Explicit chunk field (`extra.chunks.current`)
    pub explicit_chunk: Option<u32>,
    /// Legacy chunk-index property (`THIS_CHUNK`)
    pub legacy_chunk: Option<u32>,
    /// Legacy test-type tag
    pub test_type_tag: Option<String>,
}

/// Decomposed run identity
#[derive(Debug, Default)]
pub struct ParsedSuite {
    /// Metadata name with run-type infixes stripped
    pub name: Option<String>,
    pub suite: SuiteInfo,
    pub chunk: Option<u32>,
    /// Sorted, deduplicated run-type flags
    pub run_type: Vec<String>,
}

/// Decomposes a composite test identifier.
///
/// A stray `e10s` that is not the `-e10s` infix is an unexpected encoding
/// and fails the parse; everything else degrades to `None` fields.
pub fn parse_suite(
    coalescer: &mut Coalescer,
    input: SuiteInput,
) -> Result<ParsedSuite, NormalizeError> {
    let mut run_type: BTreeSet<String> = BTreeSet::new();

    // 1. -e10s infix in the metadata name
    let name = match input.metadata_name {
        Some(raw) => {
            if raw.contains("-e10s") {
                run_type.insert("e10s".to_string());
                Some(raw.replace("-e10s", ""))
            } else if raw.contains("e10s") {
                return Err(NormalizeError::UnexpectedFormat(format!(
                    "stray e10s in run name {raw:?}"
                )));
            } else {
                Some(raw)
            }
        }
        None => None,
    };

    // 2. flavor relative to suite
    let mut suite = input.suite_name.map(|s| s.to_lowercase());
    let mut flavor = input.flavor.map(|f| f.to_lowercase());
    if flavor == suite {
        flavor = None;
    } else if let (Some(s), Some(f)) = (&suite, &flavor) {
        if let Some(stripped) = f.strip_prefix(&format!("{s}-")) {
            flavor = Some(stripped.to_string());
        }
    }

    // 3. mochitest encodes its sub-suite (and sometimes the chunk) in its
    //    own name: mochitest-chrome, mochitest-media-2, mochitest-plain-clipboard
    let mut parsed_chunk: Option<u32> = None;
    if let Some(s) = suite.clone() {
        if let Some(rest) = s.strip_prefix("mochitest-") {
            let mut tokens: Vec<&str> = rest.split('-').collect();
            if let Some(last) = tokens.last() {
                if let Ok(n) = last.parse::<u32>() {
                    parsed_chunk = Some(n);
                    tokens.pop();
                }
            }
            suite = Some("mochitest".to_string());
            let sub = tokens.join("-");
            flavor = match (sub.is_empty(), flavor) {
                (true, f) => f,
                (false, None) => Some(sub),
                (false, Some(f)) => Some(format!("{sub}-{f}")),
            };
        }
    }

    // 4. -e10s inside the flavor
    if let Some(f) = &flavor {
        if f.contains("-e10s") {
            run_type.insert("e10s".to_string());
            let stripped = f.replace("-e10s", "").trim().to_string();
            flavor = if stripped.is_empty() {
                None
            } else {
                Some(stripped)
            };
        }
    }

    // 5. chunked flavor
    if flavor.as_deref() == Some("chunked") {
        flavor = None;
        run_type.insert("chunked".to_string());
    } else if let Some(f) = &flavor {
        if f.contains("-chunked") {
            run_type.insert("chunked".to_string());
            let stripped = f.replace("-chunked", "").trim().to_string();
            flavor = if stripped.is_empty() {
                None
            } else {
                Some(stripped)
            };
        }
    }

    // 6. trailing chunk number on the suite name, else on the cleaned
    //    metadata name
    if parsed_chunk.is_none() {
        if let Some(s) = &suite {
            let tokens: Vec<&str> = s.split('-').collect();
            if tokens.len() > 1 {
                if let Ok(n) = tokens[tokens.len() - 1].parse::<u32>() {
                    parsed_chunk = Some(n);
                    suite = Some(tokens[..tokens.len() - 1].join("-"));
                }
            }
        }
    }
    // Only a task that names a suite gets its chunk guessed from the
    // metadata name; otherwise any `-<n>` suffix is part of the name
    if parsed_chunk.is_none() && suite.is_some() {
        parsed_chunk = name
            .as_deref()
            .and_then(|n| n.rsplit('-').next())
            .and_then(|token| token.parse::<u32>().ok());
    }

    // 7. chunk precedence: explicit field, legacy property, parsed
    let chunk = coalescer.pick(
        "run.chunk",
        vec![input.explicit_chunk, input.legacy_chunk, parsed_chunk],
    )?;

    // 8. suite precedence: parsed token, legacy test-type tag
    let suite = coalescer.pick("run.suite", vec![suite, input.test_type_tag])?;

    Ok(ParsedSuite {
        name,
        suite: SuiteInfo::with_fullname(suite, flavor),
        chunk,
        run_type: run_type.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coalescer() -> Coalescer {
        Coalescer::new("tc.0:1")
    }

    #[test]
    fn test_mochitest_clipboard_round_trip() {
        let mut c = coalescer();
        let parsed = parse_suite(
            &mut c,
            SuiteInput {
                metadata_name: Some("mochitest-plain-clipboard-e10s-3".to_string()),
                suite_name: Some("mochitest-plain-clipboard".to_string()),
                flavor: Some("mochitest-plain-clipboard".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(parsed.suite.name.as_deref(), Some("mochitest"));
        assert_eq!(parsed.suite.flavor.as_deref(), Some("plain-clipboard"));
        assert_eq!(parsed.suite.fullname.as_deref(), Some("mochitest-plain-clipboard"));
        assert_eq!(parsed.chunk, Some(3));
        assert_eq!(parsed.run_type, vec!["e10s".to_string()]);
        assert!(c.conflicts().is_empty());
    }

    #[test]
    fn test_explicit_chunk_beats_parsed_with_conflict() {
        let mut c = coalescer();
        let parsed = parse_suite(
            &mut c,
            SuiteInput {
                metadata_name: Some("reftest-3".to_string()),
                suite_name: Some("reftest-3".to_string()),
                explicit_chunk: Some(5),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(parsed.chunk, Some(5));
        assert_eq!(parsed.suite.name.as_deref(), Some("reftest"));
        assert_eq!(c.conflicts().len(), 1);
        assert_eq!(c.conflicts()[0].field, "run.chunk");
    }

    #[test]
    fn test_mochitest_media_chunk_in_suite_name() {
        let mut c = coalescer();
        let parsed = parse_suite(
            &mut c,
            SuiteInput {
                metadata_name: Some("mochitest-media-2".to_string()),
                suite_name: Some("mochitest-media-2".to_string()),
                flavor: Some("mochitest-media-2".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(parsed.suite.name.as_deref(), Some("mochitest"));
        assert_eq!(parsed.suite.flavor.as_deref(), Some("media"));
        assert_eq!(parsed.chunk, Some(2));
        assert!(parsed.run_type.is_empty());
    }

    #[test]
    fn test_flavor_prefix_stripped() {
        let mut c = coalescer();
        let parsed = parse_suite(
            &mut c,
            SuiteInput {
                metadata_name: Some("xpcshell".to_string()),
                suite_name: Some("xpcshell".to_string()),
                flavor: Some("xpcshell-coverage".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(parsed.suite.name.as_deref(), Some("xpcshell"));
        assert_eq!(parsed.suite.flavor.as_deref(), Some("coverage"));
        assert_eq!(parsed.suite.fullname.as_deref(), Some("xpcshell-coverage"));
    }

    #[test]
    fn test_chunked_flavor_becomes_flag() {
        let mut c = coalescer();
        let parsed = parse_suite(
            &mut c,
            SuiteInput {
                metadata_name: Some("web-platform-tests".to_string()),
                suite_name: Some("web-platform-tests".to_string()),
                flavor: Some("chunked".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(parsed.suite.flavor, None);
        assert_eq!(parsed.run_type, vec!["chunked".to_string()]);
    }

    #[test]
    fn test_stray_e10s_is_unexpected_format() {
        let mut c = coalescer();
        let result = parse_suite(
            &mut c,
            SuiteInput {
                metadata_name: Some("teste10sweird".to_string()),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(NormalizeError::UnexpectedFormat(_))));
    }

    #[test]
    fn test_build_task_degrades_to_empty() {
        let mut c = coalescer();
        let parsed = parse_suite(&mut c, SuiteInput::default()).unwrap();
        assert_eq!(parsed.suite.name, None);
        assert_eq!(parsed.suite.fullname, None);
        assert_eq!(parsed.chunk, None);
        assert!(parsed.run_type.is_empty());
    }

    #[test]
    fn test_no_suite_means_no_chunk_guess() {
        let mut c = coalescer();
        let parsed = parse_suite(
            &mut c,
            SuiteInput {
                metadata_name: Some("dependencies-2".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(parsed.name.as_deref(), Some("dependencies-2"));
        assert_eq!(parsed.suite.name, None);
        assert_eq!(parsed.chunk, None);
    }

    #[test]
    fn test_e10s_flag_from_name_and_flavor_is_recorded_once() {
        let mut c = coalescer();
        let parsed = parse_suite(
            &mut c,
            SuiteInput {
                metadata_name: Some("reftest-e10s".to_string()),
                suite_name: Some("reftest".to_string()),
                flavor: Some("opengl-e10s".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(parsed.suite.name.as_deref(), Some("reftest"));
        assert_eq!(parsed.suite.flavor.as_deref(), Some("opengl"));
        assert_eq!(parsed.run_type, vec!["e10s".to_string()]);
    }
}
