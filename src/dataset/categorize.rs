//! Question categorization.
//!
//! Classifies a question by topic (keyword hits), time horizon (year
//! mentions or relative phrases), question type (an ordered wording rule
//! chain), probability bucket and confidence level. Classification is a
//! pure function of the text, the market probability, and the keyword
//! table / reference year the `Categorizer` was built with.

use std::collections::BTreeMap;
use tracing::info;

use crate::config::CategorizerConfig;
use crate::types::{
    CategoryMetadata, ConfidenceLevel, EvalError, EvalItem, ProbabilityBucket, QuestionRecord,
    QuestionType, TimeHorizon, Topic,
};

// ---------------------------------------------------------------------------
// Keyword table
// ---------------------------------------------------------------------------

const SPORTS: &[&str] = &[
    "nba", "nfl", "mlb", "nhl", "soccer", "football", "basketball", "baseball",
    "hockey", "tennis", "golf", "olympics", "championship", "tournament", "mvp",
    "rookie", "season", "game", "match", "team", "player", "coach", "league",
    "world cup", "super bowl", "finals", "playoff", "win the", "score",
    "motogp", "formula", "racing", "athletic", "athlete", "sport",
];

const POLITICS: &[&str] = &[
    "election", "vote", "president", "senator", "congress", "parliament",
    "governor", "mayor", "party", "democrat", "republican", "campaign",
    "candidate", "primary", "caucus", "poll", "debate", "government",
    "minister", "cabinet", "policy", "legislation", "bill", "law",
    "political", "politician", "borough", "mayoral", "gubernatorial",
    "house of councillors", "seats", "ldp", "komeito", "jcp", "jip", "dpp",
    "councillors", "council", "assembly", "senate", "representatives",
];

const ECONOMICS: &[&str] = &[
    "gdp", "inflation", "unemployment", "recession", "economy", "economic",
    "market", "stock", "bond", "interest rate", "federal reserve", "fed",
    "price", "dollar", "euro", "currency", "trade", "tariff", "budget",
    "debt", "deficit", "growth", "earnings", "revenue", "profit",
];

const TECHNOLOGY: &[&str] = &[
    "ai", "artificial intelligence", "machine learning", "robot", "software",
    "hardware", "computer", "internet", "tech", "startup", "ipo", "release",
    "launch", "update", "version", "app", "platform", "digital", "cyber",
    "quantum", "blockchain", "cryptocurrency", "bitcoin", "ethereum",
];

const SCIENCE: &[&str] = &[
    "research", "study", "scientist", "discovery", "experiment", "theory",
    "physics", "chemistry", "biology", "medicine", "space", "nasa", "climate",
    "temperature", "weather", "earthquake", "volcano", "pandemic", "virus",
    "vaccine", "treatment", "diagnosis", "breakthrough", "innovation",
];

const ENTERTAINMENT: &[&str] = &[
    "movie", "film", "box office", "oscar", "grammy", "emmy", "award",
    "music", "album", "song", "artist", "actor", "actress", "director",
    "show", "series", "netflix", "streaming", "release", "premiere",
    "concert", "tour", "festival", "performance",
];

const GEOPOLITICS: &[&str] = &[
    "war", "peace", "treaty", "alliance", "nato", "un", "united nations",
    "sanctions", "diplomatic", "ambassador", "embassy", "international",
    "border", "conflict", "military", "defense", "security", "foreign",
    "relations", "agreement", "negotiation", "summit",
];

/// Ordered topic → keyword-phrase lookup. Declaration order breaks ties.
#[derive(Debug, Clone)]
pub struct KeywordTable {
    /// Each phrase is stored pre-tokenized.
    entries: Vec<(Topic, Vec<Vec<String>>)>,
}

impl Default for KeywordTable {
    fn default() -> Self {
        Self::new(vec![
            (Topic::Sports, owned_phrases(SPORTS)),
            (Topic::Politics, owned_phrases(POLITICS)),
            (Topic::Economics, owned_phrases(ECONOMICS)),
            (Topic::Technology, owned_phrases(TECHNOLOGY)),
            (Topic::Science, owned_phrases(SCIENCE)),
            (Topic::Entertainment, owned_phrases(ENTERTAINMENT)),
            (Topic::Geopolitics, owned_phrases(GEOPOLITICS)),
        ])
    }
}

fn owned_phrases(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

impl KeywordTable {
    pub fn new(entries: Vec<(Topic, Vec<String>)>) -> Self {
        let entries = entries
            .into_iter()
            .map(|(topic, phrases)| {
                let phrases = phrases
                    .iter()
                    .map(|p| tokenize(p))
                    .filter(|tokens| !tokens.is_empty())
                    .collect();
                (topic, phrases)
            })
            .collect();
        Self { entries }
    }

    /// Replace the phrases for one topic, appending the topic if it is new.
    pub fn with_topic(mut self, topic: Topic, phrases: &[String]) -> Self {
        let tokens: Vec<Vec<String>> = phrases
            .iter()
            .map(|p| tokenize(p))
            .filter(|t| !t.is_empty())
            .collect();
        match self.entries.iter_mut().find(|(t, _)| *t == topic) {
            Some(entry) => entry.1 = tokens,
            None => self.entries.push((topic, tokens)),
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Text helpers
// ---------------------------------------------------------------------------

/// Lower-case the text and split it into alphanumeric words.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(String::from)
        .collect()
}

/// Number of places `phrase` appears as a contiguous run of whole words.
fn count_phrase(tokens: &[String], phrase: &[String]) -> usize {
    if phrase.is_empty() || phrase.len() > tokens.len() {
        return 0;
    }
    tokens.windows(phrase.len()).filter(|w| *w == phrase).count()
}

fn contains_phrase(tokens: &[String], phrase: &str) -> bool {
    count_phrase(tokens, &tokenize(phrase)) > 0
}

/// All standalone four-digit numbers beginning with "20".
fn year_mentions(text: &str) -> Vec<u32> {
    let mut years = Vec::new();
    let mut run = String::new();
    for c in text.chars().chain(std::iter::once(' ')) {
        if c.is_ascii_digit() {
            run.push(c);
            continue;
        }
        if run.len() == 4 && run.starts_with("20") {
            if let Ok(y) = run.parse() {
                years.push(y);
            }
        }
        run.clear();
    }
    years
}

// ---------------------------------------------------------------------------
// Free classification functions
// ---------------------------------------------------------------------------

/// Ten-point bucket for a 0–100 probability.
pub fn probability_bucket(market_probability: f64) -> ProbabilityBucket {
    ProbabilityBucket::from_probability(market_probability)
}

/// Distance-from-50 confidence band for a 0–100 probability.
pub fn confidence_level(market_probability: f64) -> ConfidenceLevel {
    let p = market_probability;
    if p <= 20.0 || p >= 80.0 {
        ConfidenceLevel::High
    } else if p <= 35.0 || p >= 65.0 {
        ConfidenceLevel::Medium
    } else {
        ConfidenceLevel::Low
    }
}

/// Question type from the first matching wording rule.
pub fn question_type(question: &str) -> QuestionType {
    let q = question.trim().to_lowercase();
    let starts_will = q.starts_with("will");
    let has_any = |words: &[&str]| words.iter().any(|w| q.contains(w));

    if starts_will && q.contains("win") {
        QuestionType::CompetitionOutcome
    } else if starts_will && has_any(&["be", "reach", "exceed", "above", "below"]) {
        QuestionType::ThresholdQuestion
    } else if starts_will && has_any(&["happen", "occur", "take place"]) {
        QuestionType::EventOccurrence
    } else if has_any(&["how many", "how much"]) {
        QuestionType::NumericalPrediction
    } else if q.starts_with("who will") {
        QuestionType::SelectionQuestion
    } else {
        QuestionType::GeneralPrediction
    }
}

// ---------------------------------------------------------------------------
// Categorizer
// ---------------------------------------------------------------------------

/// Classifier configured with a keyword table and a fixed reference year.
#[derive(Debug, Clone)]
pub struct Categorizer {
    keywords: KeywordTable,
    reference_year: u32,
}

impl Default for Categorizer {
    fn default() -> Self {
        Self::new(KeywordTable::default(), 2025)
    }
}

impl Categorizer {
    pub fn new(keywords: KeywordTable, reference_year: u32) -> Self {
        Self { keywords, reference_year }
    }

    /// Build from configuration, applying per-topic keyword overrides.
    pub fn from_config(config: &CategorizerConfig) -> Result<Self, EvalError> {
        let mut table = KeywordTable::default();
        let mut overrides: Vec<(&String, &Vec<String>)> = config.keywords.iter().collect();
        overrides.sort_by(|a, b| a.0.cmp(b.0));
        for (name, phrases) in overrides {
            let topic: Topic = name.parse()?;
            if topic == Topic::Other {
                return Err(EvalError::Config("keywords cannot be assigned to 'other'".into()));
            }
            table = table.with_topic(topic, phrases);
        }
        Ok(Self::new(table, config.reference_year))
    }

    pub fn reference_year(&self) -> u32 {
        self.reference_year
    }

    /// Topic with the most whole-word keyword hits, `Other` when none hit.
    pub fn classify_topic(&self, question: &str) -> Topic {
        let tokens = tokenize(question);
        let mut best = (Topic::Other, 0usize);
        for (topic, phrases) in &self.keywords.entries {
            let hits: usize = phrases.iter().map(|p| count_phrase(&tokens, p)).sum();
            if hits > best.1 {
                best = (*topic, hits);
            }
        }
        best.0
    }

    /// Latest year mentioned, else a year implied by a relative phrase.
    pub fn time_horizon(&self, question: &str) -> TimeHorizon {
        if let Some(year) = year_mentions(question).into_iter().max() {
            return TimeHorizon::Year(year);
        }

        let tokens = tokenize(question);
        let any = |phrases: &[&str]| phrases.iter().any(|p| contains_phrase(&tokens, p));

        if any(&["this year", "this season"]) {
            TimeHorizon::Year(self.reference_year)
        } else if any(&["next year", "next season"]) {
            TimeHorizon::Year(self.reference_year + 1)
        } else if any(&["this month", "next month", "july", "august", "september"]) {
            TimeHorizon::Year(self.reference_year)
        } else {
            TimeHorizon::NoYear
        }
    }

    /// Full classification of one question.
    pub fn categorize(&self, question: &str, market_probability: f64) -> CategoryMetadata {
        CategoryMetadata {
            topic: self.classify_topic(question),
            time_horizon: self.time_horizon(question),
            question_type: question_type(question),
            probability_bucket: probability_bucket(market_probability),
            confidence: confidence_level(market_probability),
        }
    }

    /// Decorator stage: attach metadata to every loaded record.
    pub fn decorate(&self, records: Vec<QuestionRecord>) -> Vec<EvalItem> {
        records
            .into_iter()
            .map(|question| {
                let metadata = self.categorize(&question.question, question.market_probability);
                EvalItem { question, metadata: Some(metadata) }
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Distribution analysis
// ---------------------------------------------------------------------------

/// Value counts along each classification axis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Distribution {
    pub topic: BTreeMap<String, usize>,
    pub time_horizon: BTreeMap<String, usize>,
    pub question_type: BTreeMap<String, usize>,
    pub probability_bucket: BTreeMap<String, usize>,
    pub confidence: BTreeMap<String, usize>,
}

impl Distribution {
    pub const AXES: &'static [&'static str] =
        &["topic", "time_horizon", "question_type", "probability_bucket", "confidence"];

    pub fn axis(&self, name: &str) -> Option<&BTreeMap<String, usize>> {
        match name {
            "topic" => Some(&self.topic),
            "time_horizon" => Some(&self.time_horizon),
            "question_type" => Some(&self.question_type),
            "probability_bucket" => Some(&self.probability_bucket),
            "confidence" => Some(&self.confidence),
            _ => None,
        }
    }

    /// The `n` most frequent values on an axis, ties broken by name.
    pub fn top(&self, axis: &str, n: usize) -> Vec<(String, usize)> {
        let Some(counts) = self.axis(axis) else {
            return Vec::new();
        };
        let mut sorted: Vec<(String, usize)> =
            counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        sorted.truncate(n);
        sorted
    }

    /// Log the top five values of every axis.
    pub fn log_summary(&self) {
        for axis in Self::AXES {
            let top = self.top(axis, 5);
            if top.is_empty() {
                continue;
            }
            let rendered: Vec<String> = top.iter().map(|(v, c)| format!("{v}: {c}")).collect();
            info!(axis = *axis, values = %rendered.join(", "), "Category distribution");
        }
    }
}

/// Count categorized items along every axis. Uncategorized items are skipped.
pub fn analyze_distribution(items: &[EvalItem]) -> Distribution {
    let mut dist = Distribution::default();
    for meta in items.iter().filter_map(|i| i.metadata.as_ref()) {
        *dist.topic.entry(meta.topic.to_string()).or_default() += 1;
        *dist.time_horizon.entry(meta.time_horizon.to_string()).or_default() += 1;
        *dist.question_type.entry(meta.question_type.to_string()).or_default() += 1;
        *dist.probability_bucket.entry(meta.probability_bucket.to_string()).or_default() += 1;
        *dist.confidence.entry(meta.confidence.to_string()).or_default() += 1;
    }
    dist
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
