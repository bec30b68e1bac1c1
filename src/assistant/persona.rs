//! Persona prompt selection: a pure lookup over (category, language).
//!
//! Kept data-driven so new categories or languages are additive. The same
//! inputs always produce the same canonical prompt text.

use crate::types::ChatCategory;

const BASE_EN: &str = "You are an assistant AI designed to provide information to people in \
rural India. Your goal is to provide simple, clear, and helpful information. Avoid complex \
terminology.";

const BASE_HI: &str = "आप एक सहायक AI हैं जो ग्रामीण भारत के लोगों को जानकारी प्रदान करने के \
लिए डिज़ाइन किया गया है। आपका उद्देश्य सरल, स्पष्ट और उपयोगी जानकारी प्रदान करना है। हिंदी में \
उत्तर दें और जटिल शब्दों से बचें।";

/// Category-specific instruction suffixes, English and Hindi. General has no
/// suffix: the base prompt stands alone.
const CATEGORY_SUFFIXES: &[(ChatCategory, &str, &str)] = &[
    (
        ChatCategory::Agriculture,
        " Provide information about agriculture, crop management, soil health, irrigation, \
and sustainable farming practices.",
        " कृषि, फसल प्रबंधन, मिट्टी के स्वास्थ्य, सिंचाई, और टिकाऊ खेती प्रथाओं के बारे में \
जानकारी प्रदान करें।",
    ),
    (
        ChatCategory::Health,
        " Provide information about health, hygiene, nutrition, disease prevention, and \
first aid.",
        " स्वास्थ्य, स्वच्छता, पोषण, बीमारी की रोकथाम, और प्राथमिक चिकित्सा के बारे में जानकारी \
प्रदान करें।",
    ),
    (
        ChatCategory::Education,
        " Provide information about education, literacy, schools, scholarships, and \
educational opportunities.",
        " शिक्षा, साक्षरता, स्कूल, छात्रवृत्ति, और शिक्षा के अवसरों के बारे में जानकारी प्रदान करें।",
    ),
    (
        ChatCategory::Schemes,
        " Provide information about government schemes, subsidies, welfare programs, and \
financial inclusion.",
        " सरकारी योजनाओं, सब्सिडी, कल्याणकारी कार्यक्रमों, और वित्तीय समावेशन के बारे में जानकारी \
प्रदान करें।",
    ),
    (
        ChatCategory::Weather,
        " Provide information about weather, climate, weather forecasting, and \
weather-related disasters.",
        " मौसम, जलवायु, मौसम की भविष्यवाणी, और मौसम से संबंधित आपदाओं के बारे में जानकारी प्रदान \
करें।",
    ),
    (
        ChatCategory::Employment,
        " Provide information about employment opportunities, skill development, \
self-employment, and livelihoods.",
        " रोजगार के अवसरों, कौशल विकास, स्व-रोजगार, और आजीविका के बारे में जानकारी प्रदान करें।",
    ),
];

/// Canonical system prompt for a (category, language) pair. Any language tag
/// other than "hi" selects English.
pub fn system_prompt(category: ChatCategory, language: &str) -> String {
    let hindi = language == "hi";
    let mut prompt = if hindi { BASE_HI } else { BASE_EN }.to_string();
    if let Some((_, en, hi)) = CATEGORY_SUFFIXES.iter().find(|(c, _, _)| *c == category) {
        prompt.push_str(if hindi { hi } else { en });
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn general_uses_base_prompt_only() {
        assert_eq!(system_prompt(ChatCategory::General, "en"), BASE_EN);
        assert_eq!(system_prompt(ChatCategory::General, "hi"), BASE_HI);
    }

    #[test]
    fn category_suffix_is_appended() {
        let prompt = system_prompt(ChatCategory::Agriculture, "en");
        assert!(prompt.starts_with(BASE_EN));
        assert!(prompt.contains("crop management"));

        let prompt_hi = system_prompt(ChatCategory::Agriculture, "hi");
        assert!(prompt_hi.starts_with(BASE_HI));
        assert!(prompt_hi.contains("फसल प्रबंधन"));
    }

    #[test]
    fn selection_is_reproducible() {
        for category in [
            ChatCategory::General,
            ChatCategory::Agriculture,
            ChatCategory::Health,
            ChatCategory::Education,
            ChatCategory::Schemes,
            ChatCategory::Weather,
            ChatCategory::Employment,
        ] {
            for lang in ["en", "hi"] {
                assert_eq!(system_prompt(category, lang), system_prompt(category, lang));
            }
        }
    }

    #[test]
    fn unknown_language_falls_back_to_english() {
        assert_eq!(
            system_prompt(ChatCategory::Health, "ta"),
            system_prompt(ChatCategory::Health, "en")
        );
    }
}
