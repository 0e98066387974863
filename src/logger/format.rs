//! Log formatting and output
//!
//! Colorized console line `HH:MM:SS [TAG] [LEVEL] message`, wrapped at word
//! boundaries, mirrored uncolored to the file sink.

use super::file::write_to_file;
use super::tags::LogTag;
use chrono::Local;
use colored::*;
use std::io::{stdout, ErrorKind, Write};

/// Log format widths for alignment
const TAG_WIDTH: usize = 10;
const LOG_TYPE_WIDTH: usize = 8;
const BRACKET_SPACE_WIDTH: usize = 3;
const TOTAL_PREFIX_WIDTH: usize = TAG_WIDTH + LOG_TYPE_WIDTH + BRACKET_SPACE_WIDTH * 2;

/// Maximum line length before wrapping
const MAX_LINE_LENGTH: usize = 145;

/// Format and output a log message
pub fn format_and_log(tag: LogTag, log_type: &str, message: &str) {
    let now = Local::now();
    let prefix = format!("{} ", now.format("%H:%M:%S")).dimmed().to_string();

    let base_line = format!(
        "{}[{}] [{}] ",
        prefix,
        format_tag(&tag),
        format_log_type(log_type)
    );

    let base_length = strip_ansi_codes(&base_line).len();
    let available_space = if MAX_LINE_LENGTH > base_length {
        MAX_LINE_LENGTH - base_length
    } else {
        50
    };

    let message_chunks = wrap_text(message, available_space);

    let timestamp = now.format("%Y-%m-%d %H:%M:%S").to_string();
    let tag_clean = tag.to_plain_string();
    let continuation_prefix = " ".repeat(strip_ansi_codes(&prefix).len() + TOTAL_PREFIX_WIDTH);

    for (i, chunk) in message_chunks.iter().enumerate() {
        if i == 0 {
            print_stdout_safe(&format!("{}{}", base_line, chunk));
        } else {
            print_stdout_safe(&format!("{}{}", continuation_prefix, chunk));
        }
        write_to_file(&format!(
            "{} [{}] [{}] {}",
            timestamp, tag_clean, log_type, chunk
        ));
    }
}

/// Format a tag with its color
fn format_tag(tag: &LogTag) -> ColoredString {
    let label = format!("{:<width$}", tag.to_plain_string(), width = TAG_WIDTH);
    match tag {
        LogTag::System => label.bright_yellow().bold(),
        LogTag::Config => label.bright_white().bold(),
        LogTag::Webserver => label.bright_blue().bold(),
        LogTag::Gateway => label.bright_cyan().bold(),
        LogTag::Auth => label.bright_magenta().bold(),
        LogTag::Registry => label.bright_green().bold(),
        LogTag::RateLimit => label.bright_red().bold(),
        LogTag::Dispatcher => label.bright_purple().bold(),
        LogTag::Health => label.green().bold(),
    }
}

/// Format the level column
fn format_log_type(log_type: &str) -> ColoredString {
    let label = format!("{:<width$}", log_type, width = LOG_TYPE_WIDTH);
    match log_type.to_uppercase().as_str() {
        "ERROR" => label.bright_red().bold(),
        "WARNING" => label.bright_yellow().bold(),
        "DEBUG" | "VERBOSE" => label.dimmed(),
        _ => label.white().bold(),
    }
}

/// Print to stdout, exiting quietly on a broken pipe
fn print_stdout_safe(message: &str) {
    if let Err(e) = writeln!(stdout(), "{}", message) {
        if e.kind() == ErrorKind::BrokenPipe {
            std::process::exit(0);
        }
        let _ = writeln!(std::io::stderr(), "Logger stdout error: {}", e);
    }
    if let Err(e) = stdout().flush() {
        if e.kind() == ErrorKind::BrokenPipe {
            std::process::exit(0);
        }
    }
}

fn strip_ansi_codes(text: &str) -> String {
    let mut result = String::new();
    let mut in_escape = false;

    for ch in text.chars() {
        if ch == '\x1b' {
            in_escape = true;
        } else if in_escape && ch == 'm' {
            in_escape = false;
        } else if !in_escape {
            result.push(ch);
        }
    }
    result
}

/// Wrap text at word boundaries, respecting existing newlines
fn wrap_text(text: &str, max_width: usize) -> Vec<String> {
    let mut result = Vec::new();

    for line in text.split('\n') {
        if strip_ansi_codes(line).len() <= max_width {
            result.push(line.to_string());
            continue;
        }

        let mut current_line = String::new();
        for word in line.split_whitespace() {
            let word_len = strip_ansi_codes(word).len();
            let current_len = strip_ansi_codes(&current_line).len();

            if word_len > max_width {
                if !current_line.is_empty() {
                    result.push(std::mem::take(&mut current_line));
                }
                result.extend(break_long_word(word, max_width));
            } else if current_line.is_empty() {
                current_line = word.to_string();
            } else if current_len + word_len + 1 <= max_width {
                current_line.push(' ');
                current_line.push_str(word);
            } else {
                result.push(std::mem::replace(&mut current_line, word.to_string()));
            }
        }

        if !current_line.is_empty() {
            result.push(current_line);
        }
    }

    if result.is_empty() {
        result.push(String::new());
    }

    result
}

/// Break a very long word into `max_width` character chunks
fn break_long_word(word: &str, max_width: usize) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    chars
        .chunks(max_width.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_text_short_line_untouched() {
        assert_eq!(wrap_text("hello world", 40), vec!["hello world".to_string()]);
    }

    #[test]
    fn test_wrap_text_breaks_at_words() {
        let lines = wrap_text("alpha beta gamma delta", 11);
        assert_eq!(lines, vec!["alpha beta", "gamma delta"]);
    }

    #[test]
    fn test_wrap_text_splits_long_word() {
        let lines = wrap_text("abcdefghij", 4);
        assert_eq!(lines, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_strip_ansi_codes() {
        let colored = "\x1b[1;31mERROR\x1b[0m";
        assert_eq!(strip_ansi_codes(colored), "ERROR");
    }
}
