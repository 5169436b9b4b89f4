use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum SlashCommand {
    Approve,
    Edit(Value),
    Reject,
    Stop,
    Resume,
    Cancel,
    Status,
    Tools,
    Limit(u32),
    Help,
    Quit,
    Usage(&'static str),
    Unknown(String),
}

/// One line of user input: a goal or a slash command.
#[derive(Debug, Clone, PartialEq)]
pub enum UserInput {
    Goal(String),
    Command(SlashCommand),
}

pub const HELP_TEXT: &str = "Type a goal to start a task.\n\
/approve            run the proposed command\n\
/edit <json>        replace the proposed command's parameters\n\
/reject             discard the proposal and try an alternative\n\
/stop               pause the task\n\
/resume             continue a stopped task\n\
/cancel             abandon the task\n\
/limit <n>          set the executed-command cap\n\
/status             show task and connection status\n\
/tools              refresh and list server tools\n\
/help               show this help\n\
/quit               exit";

pub fn parse_input(input: &str) -> Option<UserInput> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    Some(match parse_slash_command(trimmed) {
        Some(command) => UserInput::Command(command),
        None => UserInput::Goal(trimmed.to_string()),
    })
}

pub fn parse_slash_command(input: &str) -> Option<SlashCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let (command, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (trimmed, ""),
    };

    let parsed = match command {
        "/approve" => SlashCommand::Approve,
        "/edit" if rest.is_empty() => SlashCommand::Usage("/edit <json>"),
        "/edit" => SlashCommand::Edit(parse_parameters(rest)),
        "/reject" => SlashCommand::Reject,
        "/stop" => SlashCommand::Stop,
        "/resume" => SlashCommand::Resume,
        "/cancel" => SlashCommand::Cancel,
        "/status" => SlashCommand::Status,
        "/tools" => SlashCommand::Tools,
        "/limit" => match rest.parse::<u32>() {
            Ok(limit) if limit > 0 => SlashCommand::Limit(limit),
            _ => SlashCommand::Usage("/limit <positive number>"),
        },
        "/help" => SlashCommand::Help,
        "/quit" | "/exit" => SlashCommand::Quit,
        _ => SlashCommand::Unknown(command.to_string()),
    };

    Some(parsed)
}

/// Parses command parameters typed by a human.
///
/// Shell-escaped JSON is unescaped before giving up; anything that still is
/// not a JSON object is wrapped as `{"input": ...}`.
pub fn parse_parameters(raw: &str) -> Value {
    let raw = raw.trim();
    let candidates = [
        raw.to_string(),
        raw.replace("\\\"", "\"").replace("\\\\", "\\"),
        raw.replace('\\', ""),
    ];

    for candidate in &candidates {
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            return match value {
                Value::Object(_) => value,
                other => json!({ "input": other }),
            };
        }
    }

    json!({ "input": raw })
}
