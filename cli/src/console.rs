use colored::Colorize;

pub fn print_error_message(error_message: &str) {
    println!("{}", error_message.red());
}

pub fn print_warn_message(warn_message: &str) {
    println!("{}", warn_message.yellow());
}

pub fn print_success_message(success_message: &str) {
    println!("{}", success_message.green());
}

/// A two column summary line, the label padded so consecutive lines align.
pub fn print_summary_line(label: &str, value: &str) {
    println!("  {:<12} {}", label.bold(), value);
}
