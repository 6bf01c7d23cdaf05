//! Script-based language detection and recognizer locale resolution

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

/// Default number of texts whose detected language is remembered
pub const DEFAULT_CACHE_CAPACITY: usize = 64;

/// Explicit fallback policy from a detected language to recognizer locales,
/// tried in order after an exact match. Only same-family variants appear here.
pub const LOCALE_FALLBACKS: &[(&str, &[&str])] = &[
    ("zh-Hans", &["zh-CN", "zh-SG", "zh-Hans"]),
    ("zh-Hant", &["zh-TW", "zh-HK", "zh-Hant"]),
    ("yue", &["zh-HK", "yue-CN"]),
    ("en", &["en-US", "en-GB", "en-AU", "en-CA", "en-IN"]),
    ("ja", &["ja-JP"]),
    ("ko", &["ko-KR"]),
    ("es", &["es-ES", "es-MX", "es-US"]),
    ("fr", &["fr-FR", "fr-CA"]),
    ("de", &["de-DE", "de-AT", "de-CH"]),
    ("pt", &["pt-BR", "pt-PT"]),
    ("ru", &["ru-RU"]),
];

/// Characters only written in traditional Chinese
const TRADITIONAL_MARKERS: &str = "們這個說為會對時來東國學過們還見讓幾麼從應與經點開當發問長頭實現愛";
/// Their simplified counterparts
const SIMPLIFIED_MARKERS: &str = "们这个说为会对时来东国学过们还见让几么从应与经点开当发问长头实现爱";

fn primary_subtag(locale: &str) -> &str {
    locale.split(['-', '_']).next().unwrap_or(locale)
}

fn canonical(locale: &str) -> String {
    locale.replace('_', "-").to_lowercase()
}

/// Pick a device-supported recognizer locale for a detected language.
///
/// Order: exact match, then the [`LOCALE_FALLBACKS`] table, then any supported
/// locale sharing the primary language subtag. Never falls back to an
/// unrelated language.
pub fn resolve_locale(language: &str, supported: &[String]) -> Option<String> {
    let find = |wanted: &str| {
        let wanted = canonical(wanted);
        supported.iter().find(|s| canonical(s) == wanted).cloned()
    };

    if let Some(exact) = find(language) {
        return Some(exact);
    }

    if let Some((_, candidates)) = LOCALE_FALLBACKS
        .iter()
        .find(|(lang, _)| canonical(lang) == canonical(language))
    {
        if let Some(locale) = candidates.iter().find_map(|c| find(*c)) {
            debug!("Resolved {} to fallback locale {}", language, locale);
            return Some(locale);
        }
    }

    let primary = primary_subtag(language).to_lowercase();
    let family = supported
        .iter()
        .find(|s| primary_subtag(s).to_lowercase() == primary)
        .cloned();
    if family.is_none() {
        warn!("No recognizer locale available for {}", language);
    }
    family
}

/// Guess a language tag from the scripts used in the text.
///
/// Latin-script text cannot be told apart by script, so it maps to
/// `latin_default`.
pub fn detect_script_language(text: &str, latin_default: &str) -> String {
    let mut han = 0usize;
    let mut kana = 0usize;
    let mut hangul = 0usize;
    let mut cyrillic = 0usize;
    let mut other = 0usize;

    for c in text.chars().filter(|c| c.is_alphanumeric()) {
        match c as u32 {
            0x3040..=0x30FF | 0x31F0..=0x31FF => kana += 1,
            0x1100..=0x11FF | 0x3130..=0x318F | 0xAC00..=0xD7AF => hangul += 1,
            0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xF900..=0xFAFF | 0x20000..=0x2FA1F => han += 1,
            0x0400..=0x04FF => cyrillic += 1,
            _ => other += 1,
        }
    }

    let total = han + kana + hangul + cyrillic + other;
    if total == 0 {
        return latin_default.to_string();
    }
    if kana > 0 && kana + han >= other {
        return "ja".to_string();
    }
    if hangul * 2 > total {
        return "ko".to_string();
    }
    if han * 2 > total {
        return chinese_variant(text).to_string();
    }
    if cyrillic * 2 > total {
        return "ru".to_string();
    }
    latin_default.to_string()
}

fn chinese_variant(text: &str) -> &'static str {
    let traditional = text.chars().filter(|c| TRADITIONAL_MARKERS.contains(*c)).count();
    let simplified = text.chars().filter(|c| SIMPLIFIED_MARKERS.contains(*c)).count();
    if traditional > simplified {
        "zh-Hant"
    } else {
        "zh-Hans"
    }
}

/// Size-bounded detection cache with FIFO eviction
#[derive(Debug)]
pub struct LanguageCache {
    capacity: usize,
    entries: HashMap<String, String>,
    order: VecDeque<String>,
}

impl LanguageCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&self, text: &str) -> Option<&String> {
        self.entries.get(text)
    }

    pub fn insert(&mut self, text: String, language: String) {
        if self.entries.contains_key(&text) {
            self.entries.insert(text, language);
            return;
        }
        while self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.order.push_back(text.clone());
        self.entries.insert(text, language);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Language detector owning its cache
#[derive(Debug)]
pub struct LanguageDetector {
    latin_default: String,
    cache: Mutex<LanguageCache>,
}

impl Default for LanguageDetector {
    fn default() -> Self {
        Self::new("en", DEFAULT_CACHE_CAPACITY)
    }
}

impl LanguageDetector {
    pub fn new(latin_default: impl Into<String>, capacity: usize) -> Self {
        Self {
            latin_default: latin_default.into(),
            cache: Mutex::new(LanguageCache::new(capacity)),
        }
    }

    /// Detect the language of `text`, consulting the cache first
    pub fn detect(&self, text: &str) -> String {
        if let Some(hit) = self.cache.lock().get(text) {
            return hit.clone();
        }
        let language = detect_script_language(text, &self.latin_default);
        self.cache
            .lock()
            .insert(text.to_string(), language.clone());
        language
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.lock().len()
    }
}
