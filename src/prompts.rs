//! Prompt templates for the search, reviewer and editor agents.
//!
//! Placeholders are written as `{name}` and filled by [`PromptTemplate::render`].
//! Every substituted value is XML-escaped, since source material comes from
//! arbitrary web pages and posts.

use crate::gateway::Message;
use crate::model::{AppProfile, ReviewOutput, SourceItem};

/// Rendered prompt ready for LLM.
#[derive(Debug, Clone)]
pub struct PromptInstance {
    pub template_slug: String,
    pub system: String,
    pub user: String,
}

impl PromptInstance {
    pub fn to_messages(&self) -> Vec<Message> {
        vec![Message::system(&self.system), Message::user(&self.user)]
    }
}

/// Escape XML special characters to prevent prompt injection via tag breaking.
fn escape_xml_chars(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    pub slug: &'static str,
    pub system: &'static str,
    pub user: &'static str,
}

impl PromptTemplate {
    /// Fill `{key}` placeholders in both halves of the template.
    pub fn render(&self, vars: &[(&str, &str)]) -> PromptInstance {
        let fill = |text: &str| {
            vars.iter().fold(text.to_string(), |acc, (key, value)| {
                acc.replace(&format!("{{{key}}}"), &escape_xml_chars(value))
            })
        };

        PromptInstance {
            template_slug: self.slug.to_string(),
            system: fill(self.system).trim().to_string(),
            user: fill(self.user).trim().to_string(),
        }
    }
}

// =============================================================================
// Templates
// =============================================================================

pub const SEARCH_V1: PromptTemplate = PromptTemplate {
    slug: "search_v1",
    system: r#"
You are an AI assistant that researches topics and provides concise, factual information, including sources when available.
Focus on finding recent and relevant articles, blog posts, forum discussions, and social media threads related to the user's query.
"#,
    user: "{topic}",
};

pub const REVIEWER_V1: PromptTemplate = PromptTemplate {
    slug: "reviewer_v1",
    system: r#"
You are an expert content reviewer. You read research material gathered from the web and social media and distill it into themes that can be used to market an application.

Identify key themes, pain points, and interesting angles relevant to the application. Focus on information that can be framed to highlight the benefits of the application. Do not invent facts that are not supported by the material.

Respond with JSON only:
{"distilled_topics": ["..."], "talking_points": ["..."]}
"#,
    user: r#"
<application>
<name>{app_name}</name>
<description>{app_description}</description>
<features>{app_features}</features>
</application>

<material>
{material}
</material>

Distill the material above into topics and talking points for {app_name}.
"#,
};

pub const EDITOR_V1: PromptTemplate = PromptTemplate {
    slug: "editor_v1",
    system: r#"
You are an expert social media copywriter. For each topic you are given, write one engaging post (max 280 characters) that shows how the application solves the problem the topic describes.

Keep a consistent tone: knowledgeable, helpful, and slightly enthusiastic. Include 2-3 relevant hashtags per post.

Respond with JSON only, one entry per topic, using the topic text verbatim:
{"posts": [{"topic": "...", "post": "..."}]}
"#,
    user: r#"
<application>
<name>{app_name}</name>
<description>{app_description}</description>
<features>{app_features}</features>
</application>

<topics>
{topics}
</topics>

<talking_points>
{talking_points}
</talking_points>
"#,
};

pub fn prompt_by_slug(slug: &str) -> Option<PromptTemplate> {
    match slug {
        "search_v1" => Some(SEARCH_V1),
        "reviewer_v1" => Some(REVIEWER_V1),
        "editor_v1" => Some(EDITOR_V1),
        _ => None,
    }
}

// =============================================================================
// Agent prompts
// =============================================================================

pub fn search_prompt(topic: &str) -> PromptInstance {
    SEARCH_V1.render(&[("topic", topic)])
}

pub fn reviewer_prompt(material: &[SourceItem], app: &AppProfile) -> PromptInstance {
    let material = material
        .iter()
        .enumerate()
        .map(|(i, item)| match &item.handle {
            Some(handle) => format!(
                "Result {}: URL: {} (@{}), Snippet: {}",
                i + 1,
                item.url,
                handle,
                item.snippet
            ),
            None => format!("Result {}: URL: {}, Snippet: {}", i + 1, item.url, item.snippet),
        })
        .collect::<Vec<_>>()
        .join("\n");

    REVIEWER_V1.render(&[
        ("app_name", app.name.as_str()),
        ("app_description", app.description.as_str()),
        ("app_features", app.features.as_deref().unwrap_or("")),
        ("material", material.as_str()),
    ])
}

pub fn editor_prompt(review: &ReviewOutput, app: &AppProfile) -> PromptInstance {
    let bullets = |items: &[String]| {
        items
            .iter()
            .map(|s| format!("- {s}"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let topics = bullets(&review.distilled_topics);
    let points = bullets(&review.talking_points);

    EDITOR_V1.render(&[
        ("app_name", app.name.as_str()),
        ("app_description", app.description.as_str()),
        ("app_features", app.features.as_deref().unwrap_or("")),
        ("topics", topics.as_str()),
        ("talking_points", points.as_str()),
    ])
}
