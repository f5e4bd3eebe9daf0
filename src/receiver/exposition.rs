//! Prometheus text exposition parser using nom.
//!
//! Turns one scrape body into a [`ScrapeBatch`]. Samples belonging to the same
//! family (`_bucket`, `_sum`, `_count`, `_created` and so on) are folded into a
//! single [`ScrapedSample`] per label set. Lines that fail to parse are skipped.

use crate::core::{Result, SidecarError};
use crate::metrics::{
    HistogramPayload, LabelSet, MetricKind, Quantile, SamplePayload, ScrapeBatch, ScrapedMetric,
    ScrapedSample, SummaryPayload, Timestamp,
};
use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take_while1},
    character::complete::{char, digit1, space0, space1},
    combinator::{all_consuming, map, map_res, opt, recognize, value as nom_value},
    multi::separated_list0,
    sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
    IResult,
};
use std::collections::HashMap;
use tracing::warn;

/// Family type from a `# TYPE` line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FamilyType {
    Counter,
    Gauge,
    Histogram,
    Summary,
    Untyped,
}

impl FamilyType {
    fn kind(self) -> MetricKind {
        match self {
            FamilyType::Counter => MetricKind::Sum { monotonic: true },
            FamilyType::Gauge | FamilyType::Untyped => MetricKind::Gauge,
            FamilyType::Histogram => MetricKind::Histogram,
            FamilyType::Summary => MetricKind::Summary,
        }
    }
}

/// What a sample line contributes to its family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Value,
    Created,
    Bucket,
    Sum,
    Count,
}

/// One parsed line
#[derive(Debug, Clone, PartialEq)]
enum Line<'a> {
    Type { name: &'a str, family: FamilyType },
    Sample(SampleLine<'a>),
    Comment,
    Blank,
}

#[derive(Debug, Clone, PartialEq)]
struct SampleLine<'a> {
    name: &'a str,
    labels: Vec<(&'a str, String)>,
    value: f64,
    timestamp: Option<i64>,
}

fn metric_name(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == ':')(input)
}

fn label_name(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_')(input)
}

/// Quoted label value with `\\`, `\"` and `\n` escapes
fn label_value(input: &str) -> IResult<&str, String> {
    let (input, _) = char('"')(input)?;
    let mut out = String::new();
    let mut chars = input.char_indices();
    while let Some((idx, c)) = chars.next() {
        match c {
            '"' => return Ok((&input[idx + 1..], out)),
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, '\\')) => out.push('\\'),
                Some((_, '"')) => out.push('"'),
                Some((_, other)) => {
                    out.push('\\');
                    out.push(other);
                }
                None => break,
            },
            c => out.push(c),
        }
    }
    Err(nom::Err::Error(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Char,
    )))
}

fn label(input: &str) -> IResult<&str, (&str, String)> {
    separated_pair(
        preceded(space0, label_name),
        delimited(space0, char('='), space0),
        label_value,
    )(input)
}

fn label_set(input: &str) -> IResult<&str, Vec<(&str, String)>> {
    delimited(
        char('{'),
        terminated(
            separated_list0(preceded(space0, char(',')), label),
            pair(opt(preceded(space0, char(','))), space0),
        ),
        char('}'),
    )(input)
}

fn sample_value(input: &str) -> IResult<&str, f64> {
    map_res(is_not(" \t"), str::parse::<f64>)(input)
}

fn sample_timestamp(input: &str) -> IResult<&str, i64> {
    map_res(recognize(pair(opt(char('-')), digit1)), str::parse::<i64>)(input)
}

fn sample_line(input: &str) -> IResult<&str, Line<'_>> {
    map(
        tuple((
            metric_name,
            opt(label_set),
            preceded(space1, sample_value),
            opt(preceded(space1, sample_timestamp)),
            space0,
        )),
        |(name, labels, value, timestamp, _)| {
            Line::Sample(SampleLine {
                name,
                labels: labels.unwrap_or_default(),
                value,
                timestamp,
            })
        },
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

fn type_line(input: &str) -> IResult<&str, Line<'_>> {
    map(
        tuple((
            char('#'),
            space1,
            tag("TYPE"),
            space1,
            metric_name,
            space1,
            family_type,
            space0,
        )),
        |(_, _, _, _, name, _, family, _)| Line::Type { name, family },
    )(input)
}

fn comment_line(input: &str) -> IResult<&str, Line<'_>> {
    nom_value(Line::Comment, recognize(pair(char('#'), opt(is_not("\n")))))(input)
}

fn line(input: &str) -> IResult<&str, Line<'_>> {
    let trimmed = input.trim_start();
    if trimmed.is_empty() {
        return Ok(("", Line::Blank));
    }
    all_consuming(alt((type_line, comment_line, sample_line)))(trimmed)
}

/// Accumulates every line of one series of a family
#[derive(Debug, Default)]
struct SeriesBuilder {
    value: Option<f64>,
    timestamp: Option<i64>,
    created: Option<f64>,
    sum: Option<f64>,
    count: Option<f64>,
    buckets: Vec<(f64, f64)>,
    quantiles: Vec<Quantile>,
}

#[derive(Debug)]
struct FamilyBuilder {
    name: String,
    family: FamilyType,
    series: Vec<(LabelSet, SeriesBuilder)>,
    index: HashMap<LabelSet, usize>,
}

impl FamilyBuilder {
    fn new(name: &str, family: FamilyType) -> Self {
        Self {
            name: name.to_string(),
            family,
            series: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn series_mut(&mut self, labels: LabelSet) -> &mut SeriesBuilder {
        let idx = match self.index.get(&labels) {
            Some(idx) => *idx,
            None => {
                self.index.insert(labels.clone(), self.series.len());
                self.series.push((labels, SeriesBuilder::default()));
                self.series.len() - 1
            }
        };
        &mut self.series[idx].1
    }

    fn finish(self) -> ScrapedMetric {
        let family = self.family;
        let mut metric = ScrapedMetric::new(self.name, family.kind());
        for (labels, series) in self.series {
            let timestamp = series.timestamp.and_then(Timestamp::from_unix_millis);
            let created = series.created.and_then(Timestamp::from_unix_seconds);
            let payload = match family {
                FamilyType::Counter | FamilyType::Gauge | FamilyType::Untyped => {
                    series.value.map(SamplePayload::Number)
                }
                FamilyType::Histogram => Some(SamplePayload::Histogram(histogram(&series))),
                FamilyType::Summary => Some(SamplePayload::Summary(SummaryPayload {
                    count: series.count.and_then(to_count),
                    sum: series.sum,
                    quantiles: series.quantiles,
                })),
            };
            let Some(payload) = payload else {
                warn!(metric = %metric.name, labels = %labels, "Series has no value line, skipping");
                continue;
            };
            metric.samples.push(ScrapedSample {
                labels,
                timestamp,
                created,
                payload: Some(payload),
                no_recorded_value: false,
            });
        }
        metric
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_count(value: f64) -> Option<u64> {
    if value.is_finite() && value >= 0.0 {
        Some(value.round() as u64)
    } else {
        None
    }
}

/// Cumulative `le` buckets into per-bucket counts plus the +Inf overflow.
fn histogram(series: &SeriesBuilder) -> HistogramPayload {
    let mut buckets = series.buckets.clone();
    buckets.sort_by(|a, b| a.0.total_cmp(&b.0));

    let inf = buckets
        .iter()
        .find(|(le, _)| *le == f64::INFINITY)
        .map(|(_, c)| *c);
    let count = series.count.or(inf).and_then(to_count);

    let mut bounds = Vec::new();
    let mut bucket_counts = Vec::new();
    if !buckets.is_empty() {
        let mut previous = 0.0;
        for (le, cumulative) in buckets.iter().filter(|(le, _)| le.is_finite()) {
            bounds.push(*le);
            bucket_counts.push(to_count(cumulative - previous).unwrap_or(0));
            previous = *cumulative;
        }
        let total = inf.or(series.count).unwrap_or(previous);
        bucket_counts.push(to_count(total - previous).unwrap_or(0));
    }

    HistogramPayload {
        count,
        sum: series.sum,
        bucket_counts,
        bounds,
    }
}

/// Family, type and role a sample name belongs to
fn resolve<'a>(
    name: &'a str,
    declared: &HashMap<&'a str, FamilyType>,
) -> (&'a str, FamilyType, Role) {
    if let Some(family) = declared.get(name) {
        return (name, *family, Role::Value);
    }

    const SUFFIXES: [(&str, Role); 5] = [
        ("_total", Role::Value),
        ("_created", Role::Created),
        ("_bucket", Role::Bucket),
        ("_sum", Role::Sum),
        ("_count", Role::Count),
    ];
    for (suffix, role) in SUFFIXES {
        let Some(base) = name.strip_suffix(suffix) else {
            continue;
        };
        if let Some(family) = declared.get(base) {
            let allowed = match family {
                FamilyType::Counter => matches!(role, Role::Value | Role::Created),
                FamilyType::Histogram => {
                    matches!(role, Role::Bucket | Role::Sum | Role::Count | Role::Created)
                }
                FamilyType::Summary => matches!(role, Role::Sum | Role::Count | Role::Created),
                FamilyType::Gauge | FamilyType::Untyped => false,
            };
            if allowed {
                return (base, *family, role);
            }
        }
        // `foo_created` next to a counter declared as `foo_total`
        if role == Role::Created {
            let total = format!("{}_total", base);
            if let Some((family, FamilyType::Counter)) = declared.get_key_value(total.as_str()) {
                return (*family, FamilyType::Counter, Role::Created);
            }
        }
    }

    (name, FamilyType::Untyped, Role::Value)
}

/// Parses one exposition body into a batch for `job`/`instance`. Samples
/// without their own timestamp take `scrape_time`. Fails only when the body
/// has sample lines and none of them parse.
pub fn parse_exposition(
    text: &str,
    job: &str,
    instance: &str,
    scrape_time: Timestamp,
) -> Result<ScrapeBatch> {
    let mut declared: HashMap<&str, FamilyType> = HashMap::new();
    let mut families: Vec<FamilyBuilder> = Vec::new();
    let mut family_index: HashMap<&str, usize> = HashMap::new();
    let mut parsed = 0usize;
    let mut skipped = 0usize;

    for (lineno, raw) in text.lines().enumerate() {
        let sample = match line(raw) {
            Ok((_, Line::Type { name, family })) => {
                declared.insert(name, family);
                continue;
            }
            Ok((_, Line::Comment | Line::Blank)) => continue,
            Ok((_, Line::Sample(sample))) => sample,
            Err(e) => {
                warn!(line = lineno + 1, "Skipping unparsable exposition line: {}", e);
                skipped += 1;
                continue;
            }
        };

        let (family_name, family, role) = resolve(sample.name, &declared);
        let idx = *family_index.entry(family_name).or_insert_with(|| {
            families.push(FamilyBuilder::new(family_name, family));
            families.len() - 1
        });
        let builder = &mut families[idx];
        if family == FamilyType::Counter && role == Role::Value {
            // Series keep the exposed name, `_total` included
            builder.name = sample.name.to_string();
        }

        let mut le = None;
        let mut quantile = None;
        let mut pairs = Vec::with_capacity(sample.labels.len());
        for (name, value) in sample.labels {
            match name {
                "le" if role == Role::Bucket => le = Some(value),
                "quantile" if family == FamilyType::Summary && role == Role::Value => {
                    quantile = Some(value)
                }
                _ => pairs.push((name, value)),
            }
        }

        let series = builder.series_mut(LabelSet::new(pairs));
        if sample.timestamp.is_some() {
            series.timestamp = sample.timestamp;
        }

        match role {
            Role::Value if family == FamilyType::Summary => {
                let Some(q) = quantile.and_then(|q| q.parse::<f64>().ok()) else {
                    warn!(line = lineno + 1, metric = sample.name, "Summary sample without a valid quantile label");
                    skipped += 1;
                    continue;
                };
                series.quantiles.push(Quantile {
                    quantile: q,
                    value: sample.value,
                });
            }
            Role::Value if family == FamilyType::Histogram => {
                warn!(line = lineno + 1, metric = sample.name, "Histogram sample without a known suffix");
                skipped += 1;
                continue;
            }
            Role::Value => series.value = Some(sample.value),
            Role::Created => series.created = Some(sample.value),
            Role::Sum => series.sum = Some(sample.value),
            Role::Count => series.count = Some(sample.value),
            Role::Bucket => {
                let Some(bound) = le.and_then(|le| le.parse::<f64>().ok()) else {
                    warn!(line = lineno + 1, metric = sample.name, "Bucket without a valid le label");
                    skipped += 1;
                    continue;
                };
                series.buckets.push((bound, sample.value));
            }
        }
        parsed += 1;
    }

    if parsed == 0 && skipped > 0 {
        return Err(SidecarError::parse(format!(
            "no parsable samples in scrape of {}/{} ({} lines skipped)",
            job, instance, skipped
        )));
    }

    let mut batch = ScrapeBatch::new(job, instance, scrape_time);
    batch.metrics = families
        .into_iter()
        .map(FamilyBuilder::finish)
        .filter(|m| !m.samples.is_empty())
        .collect();
    Ok(batch)
}
