use std::io::{self, Write};

use colored::*;
use serde_json::Value;
use terminal_size::{terminal_size, Height, Width};

pub fn print_header(model: &str, provider: &str, tool_count: usize) {
    let (width, _) = terminal_size().unwrap_or((Width(80), Height(24)));
    let width = width.0 as usize;

    let line = "─".repeat(width);
    println!("{}", line.black().bold());

    let name = "Switchboard".yellow().bold();
    let version = format!("v{}", env!("CARGO_PKG_VERSION")).black().bold();
    println!("  {} {}", name, version);

    // Model + Provider Info
    let info = format!("  {}  •  {}  •  {} tools", model, provider, tool_count).cyan();
    println!("{}", info);
    println!("  {}", "Type 'exit' or 'quit' to leave".black().bold());

    println!("{}", line.black().bold());
}

pub fn print_step(msg: &str) {
    println!("  {} {}", "•".green(), msg);
}

pub fn print_success(msg: &str) {
    println!("  {} {}", "✓".green().bold(), msg.green());
}

pub fn print_warning(msg: &str) {
    println!("  {} {}", "⚠️ ".yellow().bold(), msg.yellow());
}

pub fn print_error(msg: &str) {
    println!("  {} {}", "❌".red().bold(), msg.red());
}

/// Echo a dispatched tool call, e.g. `→ hello({"name":"Ada"})`
pub fn print_tool_call(name: &str, arguments: &Value) {
    println!("  {} {}({})", "→".magenta(), name.magenta().bold(), arguments);
}

pub fn print_reply(text: &str) {
    println!("\n{}: {}\n", "Assistant".green().bold(), text);
}

pub fn print_prompt() -> io::Result<()> {
    print!("{}: ", "You".blue().bold());
    io::stdout().flush()
}
