use serde::{Deserialize, Serialize};

use super::matcher::{normalize_domain, pattern_matches};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Social,
    Entertainment,
    News,
    Utility,
    Shopping,
    Education,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Social => "social",
            Category::Entertainment => "entertainment",
            Category::News => "news",
            Category::Utility => "utility",
            Category::Shopping => "shopping",
            Category::Education => "education",
            Category::Other => "other",
        }
    }
}

const DOMAIN_CATEGORIES: &[(&str, Category)] = &[
    ("facebook.com", Category::Social),
    ("twitter.com", Category::Social),
    ("x.com", Category::Social),
    ("instagram.com", Category::Social),
    ("linkedin.com", Category::Social),
    ("reddit.com", Category::Social),
    ("tiktok.com", Category::Social),
    ("snapchat.com", Category::Social),
    ("discord.com", Category::Social),
    ("telegram.org", Category::Social),
    ("whatsapp.com", Category::Social),
    ("pinterest.com", Category::Social),
    ("youtube.com", Category::Entertainment),
    ("youtu.be", Category::Entertainment),
    ("netflix.com", Category::Entertainment),
    ("hulu.com", Category::Entertainment),
    ("disneyplus.com", Category::Entertainment),
    ("primevideo.com", Category::Entertainment),
    ("hotstar.com", Category::Entertainment),
    ("twitch.tv", Category::Entertainment),
    ("spotify.com", Category::Entertainment),
    ("soundcloud.com", Category::Entertainment),
    ("cnn.com", Category::News),
    ("bbc.com", Category::News),
    ("nytimes.com", Category::News),
    ("washingtonpost.com", Category::News),
    ("reuters.com", Category::News),
    ("apnews.com", Category::News),
    ("foxnews.com", Category::News),
    ("nbcnews.com", Category::News),
    ("abcnews.go.com", Category::News),
    ("cbsnews.com", Category::News),
    ("theguardian.com", Category::News),
    ("wsj.com", Category::News),
    ("gmail.com", Category::Utility),
    ("google.com", Category::Utility),
    ("github.com", Category::Utility),
    ("stackoverflow.com", Category::Utility),
    ("outlook.com", Category::Utility),
    ("office.com", Category::Utility),
    ("notion.so", Category::Utility),
    ("slack.com", Category::Utility),
    ("zoom.us", Category::Utility),
    ("teams.microsoft.com", Category::Utility),
    ("amazon.com", Category::Shopping),
    ("ebay.com", Category::Shopping),
    ("etsy.com", Category::Shopping),
    ("walmart.com", Category::Shopping),
    ("target.com", Category::Shopping),
    ("coursera.org", Category::Education),
    ("udemy.com", Category::Education),
    ("khanacademy.org", Category::Education),
    ("edx.org", Category::Education),
    ("wikipedia.org", Category::Education),
];

/// Category for a host: exact entry first, then the longest table entry the
/// host is a subdomain of, otherwise `Other`.
pub fn categorize(domain: &str) -> Category {
    let domain = normalize_domain(domain);
    if domain.is_empty() {
        return Category::Other;
    }

    if let Some((_, category)) = DOMAIN_CATEGORIES.iter().find(|(entry, _)| *entry == domain) {
        return *category;
    }

    DOMAIN_CATEGORIES
        .iter()
        .filter(|(entry, _)| pattern_matches(&domain, entry))
        .max_by_key(|(entry, _)| entry.len())
        .map(|(_, category)| *category)
        .unwrap_or(Category::Other)
}
