//! Canonical scene categories and the normalizer that maps free text onto them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of scene labels. Stored categories are always one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Preparation,
    Ceremony,
    Portraits,
    Couple,
    Group,
    Family,
    Children,
    Pets,
    Reception,
    Party,
    Food,
    Decor,
    Details,
    Outdoor,
    Architecture,
    Product,
    Sports,
    Other,
}

impl Category {
    pub const ALL: [Category; 18] = [
        Category::Preparation,
        Category::Ceremony,
        Category::Portraits,
        Category::Couple,
        Category::Group,
        Category::Family,
        Category::Children,
        Category::Pets,
        Category::Reception,
        Category::Party,
        Category::Food,
        Category::Decor,
        Category::Details,
        Category::Outdoor,
        Category::Architecture,
        Category::Product,
        Category::Sports,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Preparation => "preparation",
            Category::Ceremony => "ceremony",
            Category::Portraits => "portraits",
            Category::Couple => "couple",
            Category::Group => "group",
            Category::Family => "family",
            Category::Children => "children",
            Category::Pets => "pets",
            Category::Reception => "reception",
            Category::Party => "party",
            Category::Food => "food",
            Category::Decor => "decor",
            Category::Details => "details",
            Category::Outdoor => "outdoor",
            Category::Architecture => "architecture",
            Category::Product => "product",
            Category::Sports => "sports",
            Category::Other => "other",
        }
    }

    /// Strict parse of a stored key. Untrusted text goes through [`normalize`].
    pub fn from_key(key: &str) -> Option<Self> {
        Category::ALL.iter().copied().find(|c| c.as_str() == key)
    }

    /// Static display label, used when no generated album name is available.
    pub fn display_name(&self) -> &'static str {
        match self {
            Category::Preparation => "Getting Ready",
            Category::Ceremony => "Ceremony",
            Category::Portraits => "Portraits",
            Category::Couple => "The Couple",
            Category::Group => "Groups",
            Category::Family => "Family",
            Category::Children => "Kids",
            Category::Pets => "Pets",
            Category::Reception => "Reception",
            Category::Party => "Party",
            Category::Food => "Food & Drinks",
            Category::Decor => "Decor",
            Category::Details => "Details",
            Category::Outdoor => "Outdoors",
            Category::Architecture => "Venue",
            Category::Product => "Product",
            Category::Sports => "Sports",
            Category::Other => "Other Moments",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const LEADING_ARTICLES: &[&str] = &["the ", "el ", "la ", "los ", "las "];

/// Plural/singular, accent and Spanish variants plus semantic synonyms.
const ALIASES: &[(&str, Category)] = &[
    // preparation
    ("prep", Category::Preparation),
    ("preparations", Category::Preparation),
    ("getting ready", Category::Preparation),
    ("getting-ready", Category::Preparation),
    ("preparativos", Category::Preparation),
    ("preparativo", Category::Preparation),
    ("makeup", Category::Preparation),
    ("hair and makeup", Category::Preparation),
    // ceremony
    ("ceremonies", Category::Ceremony),
    ("ceremonia", Category::Ceremony),
    ("vows", Category::Ceremony),
    ("wedding", Category::Ceremony),
    ("mass", Category::Ceremony),
    ("misa", Category::Ceremony),
    // portraits
    ("portrait", Category::Portraits),
    ("retrato", Category::Portraits),
    ("retratos", Category::Portraits),
    ("headshot", Category::Portraits),
    ("headshots", Category::Portraits),
    // couple
    ("couples", Category::Couple),
    ("pareja", Category::Couple),
    ("parejas", Category::Couple),
    ("bride and groom", Category::Couple),
    ("novios", Category::Couple),
    // group
    ("groups", Category::Group),
    ("grupo", Category::Group),
    ("grupos", Category::Group),
    ("group photo", Category::Group),
    ("guests", Category::Group),
    ("invitados", Category::Group),
    // family
    ("families", Category::Family),
    ("familia", Category::Family),
    ("familias", Category::Family),
    // children
    ("child", Category::Children),
    ("kids", Category::Children),
    ("kid", Category::Children),
    ("ninos", Category::Children),
    ("niños", Category::Children),
    ("nino", Category::Children),
    ("niño", Category::Children),
    ("babies", Category::Children),
    ("baby", Category::Children),
    // pets
    ("pet", Category::Pets),
    ("dog", Category::Pets),
    ("dogs", Category::Pets),
    ("cat", Category::Pets),
    ("cats", Category::Pets),
    ("mascota", Category::Pets),
    ("mascotas", Category::Pets),
    // reception
    ("receptions", Category::Reception),
    ("recepcion", Category::Reception),
    ("recepción", Category::Reception),
    ("banquet", Category::Reception),
    ("dinner", Category::Reception),
    ("speeches", Category::Reception),
    ("toast", Category::Reception),
    // party
    ("parties", Category::Party),
    ("fiesta", Category::Party),
    ("fiestas", Category::Party),
    ("celebration", Category::Party),
    ("celebrations", Category::Party),
    ("dance", Category::Party),
    ("dancing", Category::Party),
    ("dance floor", Category::Party),
    ("baile", Category::Party),
    // food
    ("comida", Category::Food),
    ("cake", Category::Food),
    ("pastel", Category::Food),
    ("drinks", Category::Food),
    ("catering", Category::Food),
    // decor
    ("decoration", Category::Decor),
    ("decorations", Category::Decor),
    ("decoracion", Category::Decor),
    ("decoración", Category::Decor),
    ("flowers", Category::Decor),
    ("florals", Category::Decor),
    // details
    ("detail", Category::Details),
    ("detalle", Category::Details),
    ("detalles", Category::Details),
    ("rings", Category::Details),
    ("anillos", Category::Details),
    ("close-up", Category::Details),
    ("closeup", Category::Details),
    // outdoor
    ("outdoors", Category::Outdoor),
    ("exterior", Category::Outdoor),
    ("exteriores", Category::Outdoor),
    ("paisaje", Category::Outdoor),
    ("landscape", Category::Outdoor),
    ("landscapes", Category::Outdoor),
    ("nature", Category::Outdoor),
    ("beach", Category::Outdoor),
    ("playa", Category::Outdoor),
    ("garden", Category::Outdoor),
    ("jardin", Category::Outdoor),
    ("jardín", Category::Outdoor),
    ("field", Category::Outdoor),
    ("park", Category::Outdoor),
    // architecture
    ("arquitectura", Category::Architecture),
    ("building", Category::Architecture),
    ("buildings", Category::Architecture),
    ("venue", Category::Architecture),
    ("church", Category::Architecture),
    ("iglesia", Category::Architecture),
    ("interior", Category::Architecture),
    // product
    ("products", Category::Product),
    ("producto", Category::Product),
    ("productos", Category::Product),
    // sports
    ("sport", Category::Sports),
    ("deporte", Category::Sports),
    ("deportes", Category::Sports),
    ("game", Category::Sports),
    ("match", Category::Sports),
    // other
    ("otro", Category::Other),
    ("otros", Category::Other),
    ("misc", Category::Other),
    ("miscellaneous", Category::Other),
];

/// Map a backend's free-text category guess onto the canonical set.
///
/// Total and deterministic: anything unrecognized becomes [`Category::Other`].
pub fn normalize(raw: &str) -> Category {
    let lowered = raw.trim().to_lowercase();
    let mut key = lowered.as_str();
    for article in LEADING_ARTICLES {
        if let Some(rest) = key.strip_prefix(article) {
            key = rest.trim_start();
            break;
        }
    }

    if let Some(category) = Category::from_key(key) {
        return category;
    }

    ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, category)| *category)
        .unwrap_or(Category::Other)
}
