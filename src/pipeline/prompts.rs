//! System/user prompt construction for each pipeline stage. One method per
//! stage, mirroring the reference node builder's structure without carrying
//! over its exact wording.

use crate::domain::Expert;

const TOOL_GUIDANCE: &str = "\
Tools available: vector_search (session documents, try first), url_search (a specific page \
or file you already found), web_search (open-ended discovery). Prefer vector_search before \
web_search or url_search, since earlier research may already be stored there. Call tools in \
parallel when their inputs are independent.";

const FORMATTING_GUIDANCE: &str = "\
Write valid markdown. Use ### and #### for sub-headings inside a section; never emit a top-level \
# or ## heading yourself. Where a chart or diagram would clarify the data, include at most one \
fenced ```chartjson``` (strict JSON: {\"title\"?, \"caption\"?, \"option\"}) or ```mermaid``` block. \
Quote every Mermaid node label (`id[\"Label\"]`), never `id[Label]`. Use exactly one equation \
delimiter style per expression ($...$, $$...$$, \\(...\\), or \\[...\\]) and never nest them. \
Add a citation (source URL) for claims drawn from a tool result.";

pub struct PromptBuilder;

impl PromptBuilder {
    pub fn outline_system_prompt() -> String {
        format!(
            "You are a professional researcher planning a research document. Analyze the research \
             idea, gather enough context with the available tools, then draft a comprehensive outline \
             covering every important section and subsection with a short description each. Do not add \
             a references section to the outline; conclusion is a normal final section, not a subsection.\n\n{TOOL_GUIDANCE}"
        )
    }

    pub fn outline_user_message(research_idea: &str) -> String {
        format!("Research idea:\n{research_idea}")
    }

    pub fn generate_perspectives(outline: &str, count: usize) -> String {
        let target = count.max(1);
        format!(
            "You are assembling a panel of {target} distinct professional perspectives who will each \
             independently draft this research document, then have their drafts combined. Make the \
             perspectives genuinely distinct in profession, role, and likely viewpoint so that together \
             they cover the topic from different angles.\n\n\
             Outline:\n{outline}"
        )
    }

    pub fn perspective_agent_system_prompt(expert: &Expert, outline: &str) -> String {
        format!(
            "You are {name}, a {profession}. Your role on this research project: {role}. Write the \
             content assigned to you for one section at a time, drawing on your perspective and the \
             research tools available to you. You will be given a running summary of sections already \
             written by you; use it for continuity. Respond with the section content only, once you are \
             confident in it — no meta-commentary about your process.\n\n{TOOL_GUIDANCE}\n\n{FORMATTING_GUIDANCE}\n\n\
             Full document outline:\n{outline}",
            name = expert.name,
            profession = expert.profession,
            role = expert.role,
        )
    }

    pub fn write_section_prompt(section_spec: &str, summary: Option<&str>) -> String {
        match summary {
            Some(summary) if !summary.trim().is_empty() => {
                format!("Write the content for this section:\n{section_spec}\n\nSummary of the previous sections:\n{summary}")
            }
            _ => format!("Write the content for this section:\n{section_spec}"),
        }
    }

    pub fn generate_rolling_summary(content: &str) -> String {
        format!(
            "Summarize the following without losing any important information, preserving flow, order, \
             and tone:\n\n{content}"
        )
    }

    pub fn generate_combined_section_system_prompt() -> String {
        format!(
            "You combine several independent drafts of the same research section into one comprehensive, \
             coherent section. Where drafts disagree, present both views side by side without flagging a \
             conflict. Output only the final section content — title as plain text (not a heading), body \
             using ### / #### for any sub-headings. Keep citations attached to the statements they support.\n\n{FORMATTING_GUIDANCE}"
        )
    }

    pub fn generate_combined_section_user_message(section_contents: &str, outline: &str, summary: Option<&str>) -> String {
        match summary {
            Some(summary) if !summary.trim().is_empty() => format!(
                "Combine these perspective drafts into one section.\n\nDrafts:\n{section_contents}\n\n\
                 Document outline:\n{outline}\n\nSummary of previously finalised sections:\n{summary}"
            ),
            _ => format!(
                "Combine these perspective drafts into one section.\n\nDrafts:\n{section_contents}\n\n\
                 Document outline:\n{outline}"
            ),
        }
    }
}
