//! Deterministic local responder used when the language model is unavailable.

pub const FALLBACK_NOTICE: &str =
    "(Native could not reach the language model, so this is an offline answer. Retry to ask again.)";

pub const DEFAULT_RESPONSE: &str = "Sorry, I don't have information regarding that.";

struct KeywordResponse {
    keywords: &'static [&'static str],
    response: &'static str,
}

// First matching entry wins, so broader keywords sit after the phrases they overlap.
const KEYWORD_RESPONSES: &[KeywordResponse] = &[
    KeywordResponse {
        keywords: &["total revenue", "revenue"],
        response: "Total revenue is $125,430, up 12.5% versus yesterday. The uplift is driven by the lunchtime promo and a higher premium-plan mix.",
    },
    KeywordResponse {
        keywords: &["active users", "users", "active"],
        response: "Active users are at 2,847, climbing 8.3%. Engagement looks healthy and retention cohorts are holding steady across desktop and mobile.",
    },
    KeywordResponse {
        keywords: &["conversion rate", "conversion", "checkout"],
        response: "Conversion rate is sitting at 3.24%, down 2.1%. Most of the slippage comes from Safari mobile sessions during checkout.",
    },
    KeywordResponse {
        keywords: &["premium plans", "premium"],
        response: "Premium plan signups are up 18% today, primarily from organic search traffic tied to the new brand campaign.",
    },
    KeywordResponse {
        keywords: &["payment gateway", "gateway", "payment"],
        response: "Payment gateway errors ticked up to 4.2% over the last hour, which triggered the on-call alert. Engineering owns the incident and mitigation is underway.",
    },
    KeywordResponse {
        keywords: &["checkout flow optimization", "checkout flow", "a/b test"],
        response: "Recommend an A/B test on the new checkout flow, since conversion dipped 2.1% after deployment. Isolate the new modal against the previous experience.",
    },
];

pub fn respond(query: &str) -> &'static str {
    let normalized = query.to_lowercase();
    KEYWORD_RESPONSES
        .iter()
        .find(|entry| entry.keywords.iter().any(|keyword| normalized.contains(keyword)))
        .map(|entry| entry.response)
        .unwrap_or(DEFAULT_RESPONSE)
}

/// Persisted body of a fallback reply: the canned answer plus the visible notice.
pub fn fallback_content(query: &str) -> String {
    format!("{}\n\n{}", respond(query), FALLBACK_NOTICE)
}
