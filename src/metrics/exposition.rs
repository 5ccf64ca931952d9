//! Prometheus text exposition reader using nom.
//!
//! Produces [`RawSample`]s for the normalizer. Malformed lines are counted
//! and skipped, a scrape is never rejected as a whole.

use crate::core::{KubepulseError, Result};
use crate::metrics::types::{Labels, MetricKind, RawSample};
use ahash::AHashMap;
use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag, take_till1, take_while, take_while1},
    character::complete::{char, space0, space1},
    combinator::{map, map_res, opt, recognize, value as nom_value},
    multi::separated_list0,
    sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
    IResult,
};

/// Declared `# TYPE` of a metric family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FamilyType {
    Counter,
    Gauge,
    Histogram,
    Summary,
    Untyped,
}

/// Samples read from one scrape body
#[derive(Debug, Default)]
pub struct ExpositionBatch {
    /// Successfully parsed samples in input order
    pub samples: Vec<RawSample>,
    /// Number of non-comment lines that could not be parsed
    pub skipped: usize,
}

/// Parse a full exposition body.
pub fn parse_exposition(text: &str) -> ExpositionBatch {
    let mut types: AHashMap<String, FamilyType> = AHashMap::new();
    let mut batch = ExpositionBatch::default();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('#') {
            if let Ok((_, (name, family))) = type_comment(line) {
                types.insert(name.to_string(), family);
            }
            continue;
        }

        match sample_line(line) {
            Ok((rest, (name, labels, value))) if rest.trim().is_empty() => {
                let kind = classify(name, &labels, &types);
                batch.samples.push(RawSample {
                    name: name.to_string(),
                    kind,
                    labels,
                    value,
                });
            },
            _ => batch.skipped += 1,
        }
    }

    if batch.skipped > 0 {
        tracing::debug!(skipped = batch.skipped, "Skipped malformed exposition lines");
    }

    batch
}

/// Parse a single sample line without family type information.
pub fn parse_line(line: &str) -> Result<RawSample> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Err(KubepulseError::invalid_sample(format!("Not a sample line: '{}'", line)));
    }
    match sample_line(line) {
        Ok((rest, (name, labels, value))) => {
            if !rest.trim().is_empty() {
                return Err(KubepulseError::parse(format!(
                    "Unexpected input after sample: '{}'",
                    rest
                )));
            }
            let kind = classify(name, &labels, &AHashMap::new());
            Ok(RawSample {
                name: name.to_string(),
                kind,
                labels,
                value,
            })
        },
        Err(e) => Err(KubepulseError::parse(format!("Failed to parse sample '{}': {}", line, e))),
    }
}

fn classify(name: &str, labels: &Labels, types: &AHashMap<String, FamilyType>) -> MetricKind {
    if let Some(family) = types.get(name) {
        return match family {
            FamilyType::Gauge => MetricKind::Gauge,
            _ => MetricKind::Counter,
        };
    }

    let suffixed = [
        ("_bucket", MetricKind::HistogramBucket),
        ("_sum", MetricKind::HistogramSum),
        ("_count", MetricKind::HistogramCount),
    ];
    for (suffix, kind) in suffixed {
        if let Some(base) = name.strip_suffix(suffix) {
            match types.get(base) {
                Some(FamilyType::Histogram) => return kind,
                Some(_) => return MetricKind::Counter,
                // undeclared: trust the suffix, `_bucket` only with an `le` label
                None if kind != MetricKind::HistogramBucket || labels.contains_key("le") => {
                    return kind
                },
                None => {},
            }
        }
    }

    MetricKind::Counter
}

fn type_comment(input: &str) -> IResult<&str, (&str, FamilyType)> {
    preceded(
        tuple((char('#'), space1, tag("TYPE"), space1)),
        separated_pair(metric_name, space1, family_type),
    )(input)
}

fn family_type(input: &str) -> IResult<&str, FamilyType> {
    alt((
        nom_value(FamilyType::Counter, tag("counter")),
        nom_value(FamilyType::Gauge, tag("gauge")),
        nom_value(FamilyType::Histogram, tag("histogram")),
        nom_value(FamilyType::Summary, tag("summary")),
        nom_value(FamilyType::Untyped, tag("untyped")),
    ))(input)
}

fn sample_line(input: &str) -> IResult<&str, (&str, Labels, f64)> {
    let (input, name) = metric_name(input)?;
    let (input, labels) = opt(label_set)(input)?;
    let (input, value) = preceded(space1, sample_value)(input)?;
    // trailing timestamps are never trusted for rate math
    let (input, _) = opt(preceded(space1, take_while1(|c: char| c.is_ascii_digit() || c == '-')))(input)?;

    Ok((input, (name, labels.unwrap_or_default(), value)))
}

fn metric_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_' || c == ':'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == ':'),
    ))(input)
}

fn label_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

fn label_value(input: &str) -> IResult<&str, String> {
    // escaped_transform rejects empty input, `opt` covers `label=""`
    map(
        delimited(
            char('"'),
            opt(escaped_transform(
                is_not("\\\""),
                '\\',
                alt((
                    nom_value("\\", tag("\\")),
                    nom_value("\"", tag("\"")),
                    nom_value("\n", tag("n")),
                )),
            )),
            char('"'),
        ),
        Option::unwrap_or_default,
    )(input)
}

fn label_pair(input: &str) -> IResult<&str, (&str, String)> {
    separated_pair(
        preceded(space0, label_name),
        delimited(space0, char('='), space0),
        label_value,
    )(input)
}

fn label_set(input: &str) -> IResult<&str, Labels> {
    let (input, pairs) = delimited(
        char('{'),
        terminated(
            separated_list0(char(','), label_pair),
            pair(opt(preceded(space0, char(','))), space0),
        ),
        char('}'),
    )(input)?;

    let labels = pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    Ok((input, labels))
}

fn sample_value(input: &str) -> IResult<&str, f64> {
    map_res(take_till1(char::is_whitespace), parse_float)(input)
}

fn parse_float(raw: &str) -> std::result::Result<f64, std::num::ParseFloatError> {
    match raw {
        "NaN" => Ok(f64::NAN),
        "+Inf" | "Inf" => Ok(f64::INFINITY),
        "-Inf" => Ok(f64::NEG_INFINITY),
        other => other.parse::<f64>(),
    }
}
