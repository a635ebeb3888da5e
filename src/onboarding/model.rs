//! Onboarding data models.

use serde::{Deserialize, Serialize};

/// What the user does on the marketplace.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Buyer,
    Seller,
    Hybrid,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buyer => "buyer",
            Self::Seller => "seller",
            Self::Hybrid => "hybrid",
        }
    }

    /// Sellers and hybrids get a pending capability record at signup.
    pub fn sells(&self) -> bool {
        matches!(self, Self::Seller | Self::Hybrid)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buyer" => Ok(Self::Buyer),
            "seller" => Ok(Self::Seller),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

const HYBRID_MARKERS: &[&str] = &["both", "hybrid", "les deux", "vyote", "zote", "كلاهما", "الاثنين"];

const SELLER_MARKERS: &[&str] = &[
    "sell", "supplier", "vendor", "farmer", "producer", "export", "vend", "fournisseur",
    "muuzaji", "kuuza", "بائع", "أبيع",
];

const BUYER_MARKERS: &[&str] = &[
    "buy", "purchas", "import", "acheteur", "achet", "mnunuzi", "kununua", "مشتر", "أشتري",
];

/// Map a free-form role answer to a [`Role`].
///
/// Heuristic substring match. Never fails: anything unrecognised is a buyer.
pub fn classify_role(answer: &str) -> Role {
    let text = answer.to_lowercase();
    let has = |markers: &[&str]| markers.iter().any(|m| text.contains(m));

    let seller = has(SELLER_MARKERS);
    if has(HYBRID_MARKERS) || (seller && has(BUYER_MARKERS)) {
        Role::Hybrid
    } else if seller {
        Role::Seller
    } else {
        Role::Buyer
    }
}

/// Answers collected so far. Every answer is stored verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnboardingFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub products: Option<String>,
}
