//! Locale resolution. Picks one of the supported reply languages from a
//! country string, a free-text sample, or both.
//!
//! Everything here is pure and total: resolution never fails, so the first
//! reply of a conversation can always be rendered.

use serde::{Deserialize, Serialize};

/// Supported reply languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    #[default]
    English,
    French,
    Swahili,
    Arabic,
}

impl Language {
    pub const ALL: [Language; 4] = [
        Language::English,
        Language::French,
        Language::Swahili,
        Language::Arabic,
    ];

    /// Two-letter code, also used as the template namespace.
    pub fn code(&self) -> &'static str {
        match self {
            Self::English => "en",
            Self::French => "fr",
            Self::Swahili => "sw",
            Self::Arabic => "ar",
        }
    }

    /// Parse a two-letter code or an English language name.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_lowercase().as_str() {
            "en" | "english" => Some(Self::English),
            "fr" | "french" => Some(Self::French),
            "sw" | "swahili" => Some(Self::Swahili),
            "ar" | "arabic" => Some(Self::Arabic),
            _ => None,
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Country names and ISO codes mapped to their reply language.
static COUNTRY_LANGUAGES: &[(&str, Language)] = &[
    // Francophone
    ("france", Language::French),
    ("fr", Language::French),
    ("senegal", Language::French),
    ("sénégal", Language::French),
    ("sn", Language::French),
    ("cote d'ivoire", Language::French),
    ("côte d'ivoire", Language::French),
    ("ivory coast", Language::French),
    ("ci", Language::French),
    ("cameroon", Language::French),
    ("cameroun", Language::French),
    ("cm", Language::French),
    ("mali", Language::French),
    ("ml", Language::French),
    ("burkina faso", Language::French),
    ("bf", Language::French),
    ("niger", Language::French),
    ("ne", Language::French),
    ("benin", Language::French),
    ("bénin", Language::French),
    ("bj", Language::French),
    ("togo", Language::French),
    ("tg", Language::French),
    ("guinea", Language::French),
    ("guinée", Language::French),
    ("gn", Language::French),
    ("gabon", Language::French),
    ("ga", Language::French),
    ("drc", Language::French),
    ("rdc", Language::French),
    ("congo", Language::French),
    ("cd", Language::French),
    ("madagascar", Language::French),
    ("mg", Language::French),
    // Swahili-speaking
    ("kenya", Language::Swahili),
    ("ke", Language::Swahili),
    ("tanzania", Language::Swahili),
    ("tz", Language::Swahili),
    ("uganda", Language::Swahili),
    ("ug", Language::Swahili),
    // Arabic-speaking
    ("egypt", Language::Arabic),
    ("eg", Language::Arabic),
    ("مصر", Language::Arabic),
    ("morocco", Language::Arabic),
    ("maroc", Language::Arabic),
    ("ma", Language::Arabic),
    ("المغرب", Language::Arabic),
    ("algeria", Language::Arabic),
    ("algérie", Language::Arabic),
    ("dz", Language::Arabic),
    ("tunisia", Language::Arabic),
    ("tunisie", Language::Arabic),
    ("tn", Language::Arabic),
    ("sudan", Language::Arabic),
    ("sd", Language::Arabic),
    ("saudi arabia", Language::Arabic),
    ("sa", Language::Arabic),
    ("united arab emirates", Language::Arabic),
    ("uae", Language::Arabic),
    ("ae", Language::Arabic),
    // Anglophone
    ("nigeria", Language::English),
    ("ng", Language::English),
    ("ghana", Language::English),
    ("gh", Language::English),
    ("south africa", Language::English),
    ("za", Language::English),
    ("rwanda", Language::English),
    ("rw", Language::English),
    ("ethiopia", Language::English),
    ("et", Language::English),
    ("zambia", Language::English),
    ("zm", Language::English),
    ("united kingdom", Language::English),
    ("uk", Language::English),
    ("gb", Language::English),
    ("united states", Language::English),
    ("usa", Language::English),
    ("us", Language::English),
];

/// International dialing prefixes mapped to country names.
///
/// Longest prefix wins, so three-digit codes are matched before `1`/`2x`.
static DIAL_PREFIXES: &[(&str, &str)] = &[
    ("254", "Kenya"),
    ("255", "Tanzania"),
    ("256", "Uganda"),
    ("250", "Rwanda"),
    ("251", "Ethiopia"),
    ("260", "Zambia"),
    ("234", "Nigeria"),
    ("233", "Ghana"),
    ("221", "Senegal"),
    ("225", "Cote d'Ivoire"),
    ("237", "Cameroon"),
    ("223", "Mali"),
    ("226", "Burkina Faso"),
    ("227", "Niger"),
    ("229", "Benin"),
    ("228", "Togo"),
    ("224", "Guinea"),
    ("241", "Gabon"),
    ("243", "DRC"),
    ("261", "Madagascar"),
    ("212", "Morocco"),
    ("213", "Algeria"),
    ("216", "Tunisia"),
    ("249", "Sudan"),
    ("966", "Saudi Arabia"),
    ("971", "United Arab Emirates"),
    ("20", "Egypt"),
    ("27", "South Africa"),
    ("33", "France"),
    ("44", "United Kingdom"),
    ("1", "United States"),
];

/// Marker words per language for the text heuristic.
static TEXT_MARKERS: &[(Language, &[&str])] = &[
    (
        Language::French,
        &[
            "bonjour", "salut", "merci", "je", "suis", "nous", "vous", "acheter", "vendre",
            "oui", "besoin", "entreprise", "bonsoir",
        ],
    ),
    (
        Language::Swahili,
        &[
            "habari", "jambo", "mambo", "asante", "nataka", "nina", "kununua", "kuuza", "ndiyo",
            "sawa", "karibu", "tafadhali", "kampuni",
        ],
    ),
    (
        Language::English,
        &[
            "hello", "hi", "hey", "thanks", "need", "want", "buy", "sell", "yes", "please",
            "company", "good",
        ],
    ),
];

/// Look up a country's reply language, if the country is known.
pub fn language_for_country(country: &str) -> Option<Language> {
    let normalized = country.trim().trim_end_matches('.').to_lowercase();
    if normalized.is_empty() {
        return None;
    }
    COUNTRY_LANGUAGES
        .iter()
        .find(|(name, _)| *name == normalized)
        .map(|(_, lang)| *lang)
}

/// Guess a language from free text. Returns `None` when there is no signal.
pub fn language_from_text(text: &str) -> Option<Language> {
    if text
        .chars()
        .any(|c| ('\u{0600}'..='\u{06FF}').contains(&c))
    {
        return Some(Language::Arabic);
    }

    let lowered = text.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .collect();

    let mut best: Option<(Language, usize)> = None;
    let mut tied = false;
    for (lang, markers) in TEXT_MARKERS {
        let hits = words.iter().filter(|w| markers.contains(w)).count();
        if hits == 0 {
            continue;
        }
        match best {
            Some((_, top)) if hits == top => tied = true,
            Some((_, top)) if hits < top => {}
            _ => {
                best = Some((*lang, hits));
                tied = false;
            }
        }
    }

    if tied { None } else { best.map(|(lang, _)| lang) }
}

/// Resolve the reply language. A country match always wins over the text
/// heuristic; with no signal at all the `default` language is used.
pub fn resolve_language(country: Option<&str>, text: Option<&str>, default: Language) -> Language {
    if let Some(lang) = country.and_then(language_for_country) {
        return lang;
    }
    text.and_then(language_from_text).unwrap_or(default)
}

/// Infer a country name from an international phone number.
pub fn country_from_phone(phone: &str) -> Option<&'static str> {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    DIAL_PREFIXES
        .iter()
        .filter(|(prefix, _)| digits.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, country)| *country)
}
