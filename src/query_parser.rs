use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

use crate::filters::FilterMap;
use crate::llm::OllamaClient;

const CACHE_TTL_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Strict,
    Flexible,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Strict => "strict",
            SearchMode::Flexible => "flexible",
        }
    }
}

/// Turns natural-language text into a filter map.
#[async_trait]
pub trait FilterParser: Send + Sync {
    async fn parse(&self, question: &str, mode: SearchMode) -> anyhow::Result<FilterMap>;
}

/// Keyword parser with an optional LLM in front of it. When the LLM call
/// fails the keyword rules answer instead.
pub struct QueryParser {
    llm: Option<OllamaClient>,
    llm_cache: Arc<RwLock<HashMap<String, (FilterMap, u64)>>>,
}

impl QueryParser {
    pub fn pattern_only() -> Self {
        Self {
            llm: None,
            llm_cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_llm(client: OllamaClient) -> Self {
        Self {
            llm: Some(client),
            llm_cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn uses_llm(&self) -> bool {
        self.llm.is_some()
    }

    /// Parse using keyword rules only (synchronous, no LLM)
    pub fn parse_pattern_only(&self, question: &str) -> FilterMap {
        let lower = question.to_lowercase();
        let mut filters = FilterMap::new();

        insert_values(&mut filters, "age_group", extract_age_groups(&lower));
        insert_values(&mut filters, "gender", extract_gender(&lower).into_iter().collect());
        insert_values(&mut filters, "region", match_keywords(&lower, REGION_KEYWORDS));
        insert_values(&mut filters, "occupation", match_keywords(&lower, OCCUPATION_KEYWORDS));
        insert_values(&mut filters, "marital_status", match_keywords(&lower, MARITAL_KEYWORDS));
        insert_values(&mut filters, "phone_brand", match_keywords(&lower, PHONE_KEYWORDS));
        insert_values(&mut filters, "car_brand", match_keywords(&lower, CAR_KEYWORDS));

        if let Some(limit) = extract_limit(&lower) {
            filters.insert("limit".to_string(), Value::from(limit));
        }

        filters
    }

    async fn parse_with_llm(&self, client: &OllamaClient, question: &str) -> anyhow::Result<FilterMap> {
        let prompt = format!(
            r#"Extract panel search filters from this question.

Question: "{}"

Return ONLY a JSON object with these keys, using null when a filter is not mentioned:
{{
  "age_group": "30s" or ["20s", "30s"] or null,
  "gender": "female" | "male" | null,
  "region": city or province name, or a list of them, or null,
  "occupation": e.g. "professional", "student", "office worker", or null,
  "marital_status": "married" | "single" | null,
  "phone_brand": e.g. "Samsung", "Apple", or null,
  "car_brand": e.g. "Hyundai", "Kia", or null,
  "limit": number of panels requested, or null
}}"#,
            question
        );

        let parsed: Value = client.generate_json(&prompt).await?;
        match parsed {
            Value::Object(map) => Ok(map.into_iter().collect()),
            other => anyhow::bail!("LLM returned non-object filters: {}", other),
        }
    }

    async fn cached(&self, key: &str) -> Option<FilterMap> {
        let cache = self.llm_cache.read().await;
        let (filters, timestamp) = cache.get(key)?;
        (now_secs().saturating_sub(*timestamp) < CACHE_TTL_SECS).then(|| filters.clone())
    }

    async fn remember(&self, key: String, filters: FilterMap) {
        let now = now_secs();
        let mut cache = self.llm_cache.write().await;
        cache.insert(key, (filters, now));
        cache.retain(|_, (_, ts)| now.saturating_sub(*ts) < CACHE_TTL_SECS);
    }
}

#[async_trait]
impl FilterParser for QueryParser {
    async fn parse(&self, question: &str, mode: SearchMode) -> anyhow::Result<FilterMap> {
        let mut filters = match &self.llm {
            Some(client) => {
                let cache_key = question.trim().to_lowercase();
                match self.cached(&cache_key).await {
                    Some(hit) => hit,
                    None => match self.parse_with_llm(client, question).await {
                        Ok(parsed) => {
                            self.remember(cache_key, parsed.clone()).await;
                            parsed
                        }
                        Err(e) => {
                            tracing::warn!(
                                "LLM parsing with '{}' failed, using keyword rules: {}",
                                client.model(),
                                e
                            );
                            self.parse_pattern_only(question)
                        }
                    },
                }
            }
            None => self.parse_pattern_only(question),
        };

        filters.insert("mode".to_string(), Value::from(mode.as_str()));
        tracing::debug!("Parsed '{}' into {:?}", question, filters);
        Ok(filters)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// One value stays scalar, several become a list.
fn insert_values(filters: &mut FilterMap, key: &str, values: Vec<String>) {
    match values.len() {
        0 => {}
        1 => {
            filters.insert(key.to_string(), Value::from(values[0].clone()));
        }
        _ => {
            filters.insert(key.to_string(), Value::from(values));
        }
    }
}

fn contains_word(haystack: &str, word: &str) -> bool {
    match regex::Regex::new(&format!(r"\b{}\b", regex::escape(word))) {
        Ok(re) => re.is_match(haystack),
        Err(_) => haystack.contains(word),
    }
}

fn extract_age_groups(lower: &str) -> Vec<String> {
    let mut groups = Vec::new();
    let Ok(decade) = regex::Regex::new(r"\b([1-9]0)(?:s\b|'s\b|대)") else {
        return groups;
    };
    for caps in decade.captures_iter(lower) {
        if let Some(m) = caps.get(1) {
            let group = format!("{}s", m.as_str());
            if !groups.contains(&group) {
                groups.push(group);
            }
        }
    }
    if groups.is_empty() && (contains_word(lower, "teens") || contains_word(lower, "teenagers")) {
        groups.push("10s".to_string());
    }
    groups
}

fn extract_gender(lower: &str) -> Option<String> {
    let female = ["women", "woman", "female", "females", "ladies", "girls", "여성"]
        .iter()
        .any(|w| contains_word(lower, w));
    let male = ["men", "man", "male", "males", "guys", "boys", "남성"]
        .iter()
        .any(|w| contains_word(lower, w));

    // both genders named means no gender constraint
    match (female, male) {
        (true, false) => Some("female".to_string()),
        (false, true) => Some("male".to_string()),
        _ => None,
    }
}

type KeywordTable = &'static [(&'static [&'static str], &'static str)];

const REGION_KEYWORDS: KeywordTable = &[
    (&["seoul", "서울"], "Seoul"),
    (&["busan", "부산"], "Busan"),
    (&["incheon", "인천"], "Incheon"),
    (&["daegu", "대구"], "Daegu"),
    (&["daejeon", "대전"], "Daejeon"),
    (&["gwangju", "광주"], "Gwangju"),
    (&["ulsan", "울산"], "Ulsan"),
    (&["sejong", "세종"], "Sejong"),
    (&["gyeonggi", "경기"], "Gyeonggi"),
    (&["gangwon", "강원"], "Gangwon"),
    (&["chungbuk"], "Chungbuk"),
    (&["chungnam"], "Chungnam"),
    (&["jeonbuk"], "Jeonbuk"),
    (&["jeonnam"], "Jeonnam"),
    (&["gyeongbuk"], "Gyeongbuk"),
    (&["gyeongnam"], "Gyeongnam"),
    (&["jeju", "제주"], "Jeju"),
];

const OCCUPATION_KEYWORDS: KeywordTable = &[
    (&["professional", "professionals"], "professional"),
    (&["office worker", "office workers", "white collar"], "office worker"),
    (&["student", "students", "college student", "university student"], "student"),
    (&["self-employed", "business owner", "business owners"], "self-employed"),
    (&["homemaker", "homemakers", "housewife", "housewives"], "homemaker"),
    (&["freelancer", "freelancers"], "freelancer"),
    (&["civil servant", "civil servants", "public servant"], "civil servant"),
    (&["unemployed", "job seeker", "job seekers"], "unemployed"),
    (&["retired", "retiree", "retirees"], "retired"),
];

const MARITAL_KEYWORDS: KeywordTable = &[
    (&["married"], "married"),
    (&["single", "unmarried"], "single"),
];

const PHONE_KEYWORDS: KeywordTable = &[
    (&["samsung", "galaxy"], "Samsung"),
    (&["apple", "iphone"], "Apple"),
    (&["lg phone"], "LG"),
    (&["xiaomi"], "Xiaomi"),
];

const CAR_KEYWORDS: KeywordTable = &[
    (&["hyundai"], "Hyundai"),
    (&["kia"], "Kia"),
    (&["genesis"], "Genesis"),
    (&["bmw"], "BMW"),
    (&["mercedes", "benz"], "Mercedes-Benz"),
    (&["tesla"], "Tesla"),
    (&["toyota"], "Toyota"),
];

fn match_keywords(lower: &str, table: KeywordTable) -> Vec<String> {
    let mut found = Vec::new();
    for (patterns, canonical) in table {
        if patterns.iter().any(|p| contains_word(lower, p)) {
            let canonical = canonical.to_string();
            if !found.contains(&canonical) {
                found.push(canonical);
            }
        }
    }
    found
}

fn extract_limit(lower: &str) -> Option<u64> {
    let re = regex::Regex::new(
        r"\b(?:top|first)\s+(\d+)\b|\b(\d+)\s+(?:people|persons|panels|panelists|respondents)\b",
    )
    .ok()?;
    let caps = re.captures(lower)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .filter(|n| *n > 0)
}
