// Prompt templates for every generation call the engine makes.

use canvas_common::types::{ArtifactKind, ArtifactVersion, CustomAction};

pub const DEFAULT_SYSTEM: &str = "You are a helpful AI assistant working alongside the user \
on a single document shown in a canvas next to the chat.";

pub const NO_REFLECTIONS: &str = "No reflections found.";

pub const NO_ARTIFACT: &str = "The user has not generated an artifact yet.";

/// Leading line a rewrite may emit to retitle the artifact.
pub const TITLE_TAG_OPEN: &str = "<title>";
pub const TITLE_TAG_CLOSE: &str = "</title>";

fn reflections_block(reflections: Option<&str>) -> String {
    format!(
        "You also have the following reflections on style guidelines and general memories/facts \
about the user:\n<reflections>\n{}\n</reflections>",
        reflections.unwrap_or(NO_REFLECTIONS)
    )
}

fn artifact_block(version: Option<&ArtifactVersion>) -> String {
    match version {
        Some(version) => format!(
            "This artifact is the one the user is currently viewing.\n<artifact>\n{}\n</artifact>",
            version.content
        ),
        None => NO_ARTIFACT.to_owned(),
    }
}

// ── Routing ────────────────────────────────────────────────────────

pub const ROUTE_SYSTEM: &str = "You route the user's latest message. Answer with exactly one \
word: `artifact` if they want the document generated or changed, `reply` if they only want a \
conversational answer. Only answer `reply` when you are certain no edit is wanted.";

pub fn route_prompt(latest: &str, current: Option<&ArtifactVersion>) -> String {
    format!("{}\n\n<message>\n{latest}\n</message>", artifact_block(current))
}

// ── Artifact producing operations ─────────────────────────────────

pub fn generate_prompt(transcript: &str, reflections: Option<&str>) -> String {
    format!(
        "Generate a new artifact based on the user's request. Use markdown syntax when \
appropriate, as the text will be rendered as markdown.\n\n\
Rules:\n\
- Do not wrap the artifact in any XML tags you see in this prompt.\n\
- If writing code, wrap it in a single fenced block tagged with its language and add nothing \
else.\n\
- Start with one line `{TITLE_TAG_OPEN}short title{TITLE_TAG_CLOSE}`.\n\n\
{}\n\nHere is the conversation:\n<conversation>\n{transcript}\n</conversation>",
        reflections_block(reflections)
    )
}

pub fn rewrite_prompt(current: &ArtifactVersion, transcript: &str, reflections: Option<&str>) -> String {
    let shape = match current.kind {
        ArtifactKind::Code => "Respond with the complete updated code only, without fences.",
        ArtifactKind::Text => "Respond with the complete updated markdown only.",
    };
    format!(
        "The user has requested an update to an artifact you generated earlier. Rewrite it \
according to their latest message.\n\n<artifact>\n{}\n</artifact>\n\n\
{shape} If the change warrants a new title, put it on the first line as \
`{TITLE_TAG_OPEN}new title{TITLE_TAG_CLOSE}`; otherwise omit that line.\n\n\
{}\n\nHere is the conversation:\n<conversation>\n{transcript}\n</conversation>",
        current.content,
        reflections_block(reflections)
    )
}

pub fn code_highlight_prompt(
    before: &str,
    highlighted: &str,
    after: &str,
    reflections: Option<&str>,
) -> String {
    format!(
        "You are an expert software engineer rewriting a portion of code the user has \
highlighted. Respond with ONLY the replacement for the highlighted code. Do not repeat the \
surrounding code and do not add fences.\n\n\
<code-before>\n{before}\n</code-before>\n\
<highlighted-code>\n{highlighted}\n</highlighted-code>\n\
<code-after>\n{after}\n</code-after>\n\n{}",
        reflections_block(reflections)
    )
}

pub fn markdown_highlight_prompt(selected: &str, block: &str, reflections: Option<&str>) -> String {
    format!(
        "You are an expert writing assistant rewriting text the user has selected. The \
selected text is nested inside a larger block. Respond with ONLY the full updated block, \
keeping its formatting and structure.\n\n\
# Selected text\n{selected}\n\n# Text block\n{block}\n\n{}",
        reflections_block(reflections)
    )
}

// ── Themes ─────────────────────────────────────────────────────────

fn theme_prompt(instruction: &str, content: &str, reflections: Option<&str>) -> String {
    format!(
        "{instruction}\n\nRespond with ONLY the rewritten artifact, with no preamble.\n\n\
<artifact>\n{content}\n</artifact>\n\n{}",
        reflections_block(reflections)
    )
}

pub fn language_prompt(language: &str, content: &str, reflections: Option<&str>) -> String {
    theme_prompt(
        &format!("Translate the following artifact into {language}. Keep its meaning and formatting."),
        content,
        reflections,
    )
}

pub fn reading_level_prompt(audience: &str, content: &str, reflections: Option<&str>) -> String {
    theme_prompt(
        &format!("Rewrite the following artifact so it reads well for a {audience}."),
        content,
        reflections,
    )
}

pub fn pirate_prompt(content: &str, reflections: Option<&str>) -> String {
    theme_prompt(
        "Rewrite the following artifact so it sounds like a pirate wrote it, keeping its content.",
        content,
        reflections,
    )
}

pub fn length_prompt(relative: &str, content: &str, reflections: Option<&str>) -> String {
    theme_prompt(
        &format!("Rewrite the following artifact to be {relative}."),
        content,
        reflections,
    )
}

pub fn emoji_prompt(content: &str, reflections: Option<&str>) -> String {
    theme_prompt(
        "Revise the following artifact by adding fitting emojis throughout. Do not change the text otherwise.",
        content,
        reflections,
    )
}

fn code_theme_prompt(instruction: &str, code: &str) -> String {
    format!(
        "{instruction}\n\nRespond with ONLY the updated code, without fences or commentary.\n\n\
<code>\n{code}\n</code>"
    )
}

pub fn add_comments_prompt(code: &str) -> String {
    code_theme_prompt("Add clear, concise comments to the following code. Do not change its behavior.", code)
}

pub fn add_logs_prompt(code: &str) -> String {
    code_theme_prompt("Add useful log statements to the following code. Do not change its behavior.", code)
}

pub fn port_language_prompt(language: &str, code: &str) -> String {
    code_theme_prompt(&format!("Port the following code to {language}, keeping its behavior."), code)
}

pub fn fix_bugs_prompt(code: &str) -> String {
    code_theme_prompt("Find and fix any bugs in the following code.", code)
}

// ── Custom actions ─────────────────────────────────────────────────

pub const CUSTOM_ACTION_PREFIX: &str =
    "You are an AI assistant. The user has provided custom instructions for you to follow.";

pub fn custom_action_prompt(
    action: &CustomAction,
    reflections: Option<&str>,
    recent_history: Option<&str>,
    artifact_content: &str,
) -> String {
    let mut prompt = format!("<custom-instructions>\n{}\n</custom-instructions>", action.prompt);
    if action.include_reflections {
        prompt.push_str("\n\n");
        prompt.push_str(&reflections_block(reflections));
    }
    if action.include_prefix {
        prompt = format!("{CUSTOM_ACTION_PREFIX}\n{prompt}");
    }
    if let Some(history) = recent_history {
        prompt.push_str(&format!(
            "\n\nHere is the recent conversation history:\n<conversation>\n{history}\n</conversation>"
        ));
    }
    prompt.push_str(&format!(
        "\n\nHere is the current artifact content:\n<artifact-content>\n{artifact_content}\n</artifact-content>"
    ));
    prompt
}

// ── Replies and post-processing ───────────────────────────────────

pub fn reply_prompt(
    current: Option<&ArtifactVersion>,
    transcript: &str,
    reflections: Option<&str>,
) -> String {
    format!(
        "Respond to the user's latest message. Do not rewrite the artifact; answer \
conversationally.\n\n{}\n\n{}\n\nHere is the conversation:\n<conversation>\n{transcript}\n</conversation>",
        reflections_block(reflections),
        artifact_block(current)
    )
}

pub fn follow_up_prompt(artifact: &str, transcript: &str, reflections: Option<&str>) -> String {
    format!(
        "You have just updated the artifact for the user. Write a short follow-up message \
letting them know you are done and inviting feedback. Never write more than 3 short \
sentences. Do not include tags or any text besides the message.\n\n\
Here is the artifact:\n<artifact>\n{artifact}\n</artifact>\n\n{}\n\n\
Here is the conversation:\n<conversation>\n{transcript}\n</conversation>",
        reflections_block(reflections)
    )
}

pub const REFLECTION_SYSTEM: &str = "You maintain long-term memory about a user. Reply with a \
single JSON object `{\"styleRules\": [string], \"content\": [string]}` and nothing else.";

pub fn reflection_prompt(existing: Option<&str>, artifact: Option<&str>, transcript: &str) -> String {
    format!(
        "Update the memory from this conversation. Keep prior entries that still hold, add new \
style rules the user implied, and add durable facts about the user.\n\n\
<existing-reflections>\n{}\n</existing-reflections>\n\n\
<artifact>\n{}\n</artifact>\n\n<conversation>\n{transcript}\n</conversation>",
        existing.unwrap_or(NO_REFLECTIONS),
        artifact.unwrap_or(NO_ARTIFACT)
    )
}

pub const TITLE_SYSTEM: &str = "You write concise conversation titles. Reply with the title \
only: at most 8 words, no quotes, no trailing punctuation.";

pub fn title_prompt(transcript: &str, artifact: Option<&str>) -> String {
    format!(
        "Write a title for this conversation.\n\n<conversation>\n{transcript}\n</conversation>\n\n\
<artifact>\n{}\n</artifact>",
        artifact.unwrap_or(NO_ARTIFACT)
    )
}

pub const SUMMARY_SYSTEM: &str = "You summarize long conversations so they can continue \
without the full history.";

pub fn summarize_prompt(transcript: &str) -> String {
    format!(
        "Summarize the conversation below. Keep every decision, requirement and open request \
the assistant needs to continue.\n\n<conversation>\n{transcript}\n</conversation>"
    )
}

/// Prefix of the hidden message that replaces a summarized history.
pub const SUMMARY_MESSAGE_PREFIX: &str =
    "The following is a summary of the conversation so far:\n\n";
