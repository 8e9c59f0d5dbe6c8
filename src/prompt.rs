use std::sync::LazyLock;

use regex::Regex;

pub const DEFAULT_DEVELOPER_PROMPT: &str = "Write a single, concise paragraph explaining the recent performance drivers \
for the requested security. Focus on material news, earnings, sector trends, or market events. \
Present only factual information and cite your sources.";

pub const DEFAULT_ATTRIBUTION_DEVELOPER_PROMPT: &str = "Write a concise overview of the portfolio's \
performance attribution for the period. Explain which sectors and countries contributed or detracted \
most and why, using only factual information, and cite your sources.";

pub const DEFAULT_SECURITY_TEMPLATE: &str = "You are a financial analyst assistant. Write a single, \
concise paragraph explaining the recent performance of {security_name} ({ticker}) during the period {period}.

Focus on:
- Key business developments, earnings, or news that drove the stock's performance
- Industry or sector trends affecting the company
- Any significant company-specific events (product launches, management changes, M&A activity)

Requirements:
- Write exactly ONE paragraph (3-5 sentences)
- Be factual and cite specific events when possible
- Use professional financial language
- Do not speculate beyond what can be verified through news sources

{source_instructions}";

pub const DEFAULT_ATTRIBUTION_TEMPLATE: &str = "You are a financial analyst assistant. Write a short \
attribution overview for portfolio {portcode} during the period {period}.

Sector attribution:
{sector_attrib}

Country attribution:
{country_attrib}

Explain the largest contributors and detractors and the market events behind them.

{source_instructions}";

const SOURCE_INSTRUCTIONS_DEFAULT: &str =
    "Include citations from reputable financial news sources for key facts.";

static DOMAIN_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9\-\.]+$").expect("valid regex"));

/// Source-instruction paragraph for a prompt.
pub fn source_instructions(preferred_sources: &[String], prioritize: bool) -> String {
    if !prioritize {
        return String::new();
    }
    if preferred_sources.is_empty() {
        return SOURCE_INSTRUCTIONS_DEFAULT.to_string();
    }
    format!(
        "Prioritize information from these reputable sources: {}. Include citations for key facts.",
        preferred_sources.join(", ")
    )
}

/// Substitute `{name}` placeholders. Unknown placeholders are left as-is so a
/// user template with stray braces still renders.
fn fill(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out.trim_end().to_string()
}

/// Renders security and attribution prompts from user templates.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    pub security_template: String,
    pub attribution_template: String,
    pub preferred_sources: Vec<String>,
    pub prioritize_sources: bool,
}

impl PromptBuilder {
    fn sources(&self) -> (String, String) {
        (
            source_instructions(&self.preferred_sources, self.prioritize_sources),
            self.preferred_sources.join(", "),
        )
    }

    pub fn security_prompt(&self, ticker: &str, security_name: &str, period: &str) -> String {
        let (instructions, sources) = self.sources();
        fill(
            &self.security_template,
            &[
                ("ticker", ticker),
                ("security_name", security_name),
                ("period", period),
                ("source_instructions", &instructions),
                ("preferred_sources", &sources),
            ],
        )
    }

    pub fn attribution_prompt(
        &self,
        portcode: &str,
        period: &str,
        sector_attrib: &str,
        country_attrib: &str,
    ) -> String {
        let (instructions, sources) = self.sources();
        fill(
            &self.attribution_template,
            &[
                ("portcode", portcode),
                ("period", period),
                ("sector_attrib", sector_attrib),
                ("country_attrib", country_attrib),
                ("source_instructions", &instructions),
                ("preferred_sources", &sources),
            ],
        )
    }
}

/// Clean a comma-separated domain list. Returns (valid domains, error messages).
pub fn validate_and_clean_domains(input: &str) -> (Vec<String>, Vec<String>) {
    let mut valid = Vec::new();
    let mut errors = Vec::new();

    for raw in input.split(',') {
        let domain = raw.trim();
        if domain.is_empty() {
            continue;
        }

        let mut cleaned = domain.to_lowercase();
        for prefix in ["https://", "http://", "www."] {
            if let Some(rest) = cleaned.strip_prefix(prefix) {
                cleaned = rest.to_string();
            }
        }
        let cleaned = cleaned.trim_end_matches('/').to_string();

        if cleaned.is_empty() {
            errors.push(format!("'{domain}' results in empty domain after cleanup"));
        } else if !cleaned.contains('.') {
            errors.push(format!(
                "'{domain}' is not a valid domain (missing top-level domain)"
            ));
        } else if !DOMAIN_CHARS.is_match(&cleaned) {
            errors.push(format!("'{domain}' contains invalid characters"));
        } else if cleaned.starts_with(['-', '.']) || cleaned.ends_with(['-', '.']) {
            errors.push(format!(
                "'{domain}' has invalid format (starts/ends with invalid character)"
            ));
        } else {
            valid.push(cleaned);
        }
    }

    (valid, errors)
}
