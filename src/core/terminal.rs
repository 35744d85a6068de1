use console::{Emoji, style};

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", INFO_ICON, style(msg).blue());
}

pub fn print_warn(msg: &str) {
    println!("{} {}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_step(step: &str) {
    println!("{} {}", SPARKLE, style(step).bold());
}

/// A titled block of lines, built up and printed in one go.
pub struct GuideSection {
    title: String,
    lines: Vec<String>,
}

impl GuideSection {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            lines: Vec::new(),
        }
    }

    pub fn text(mut self, text: &str) -> Self {
        self.lines.push(format!("  {}", text));
        self
    }

    pub fn blank(mut self) -> Self {
        self.lines.push(String::new());
        self
    }

    pub fn command(mut self, name: &str, description: &str) -> Self {
        self.lines.push(format!(
            "  {:<10} {}",
            style(name).cyan().bold(),
            style(description).dim()
        ));
        self
    }

    pub fn status(mut self, label: &str, value: &str) -> Self {
        self.lines
            .push(format!("  {:<12} {}", style(label).bold(), value));
        self
    }

    pub fn warn(mut self, text: &str) -> Self {
        self.lines
            .push(format!("  {}{}", WARN_ICON, style(text).yellow()));
        self
    }

    pub fn hint(mut self, command: &str, note: &str) -> Self {
        if note.is_empty() {
            self.lines.push(format!("    $ {}", style(command).cyan()));
        } else {
            self.lines.push(format!(
                "    $ {}  {}",
                style(command).cyan(),
                style(note).dim()
            ));
        }
        self
    }

    pub fn print(self) {
        println!();
        println!("{}", style(&self.title).bold().underlined());
        for line in self.lines {
            println!("{}", line);
        }
    }
}

pub fn print_banner(display_name: &str) {
    let lines: &[&str] = &[
        "                 _                         _ ",
        " _ __  _ __ ___ | |__   ___   __ _ _ __ __| |",
        "| '_ \\| '_ ` _ \\| '_ \\ / _ \\ / _` | '__/ _` |",
        "| |_) | | | | | | |_) | (_) | (_| | | | (_| |",
        "| .__/|_| |_| |_|_.__/ \\___/ \\__,_|_|  \\__,_|",
        "|_|                                          ",
    ];

    // Gradient: #667eea → #764ba2, same as the digest header.
    let stops: [(u8, u8, u8); 2] = [(102, 126, 234), (118, 75, 162)];
    let max_d = 46u32 + 5 * 10;

    println!();
    for (y, line) in lines.iter().enumerate() {
        for (x, ch) in line.chars().enumerate() {
            if ch == ' ' {
                print!(" ");
                continue;
            }
            let t = ((x as u32 + y as u32 * 10) * 1000 / max_d).min(1000);
            let (r, g, b) = lerp_color(stops[0], stops[1], t);
            print!("\x1b[38;2;{};{};{}m{}", r, g, b, ch);
        }
        println!();
    }
    print!("\x1b[0m");

    println!("\x1b[38;2;118;75;162m{}\x1b[0m\n", display_name);
}

fn lerp_color(a: (u8, u8, u8), b: (u8, u8, u8), t: u32) -> (u8, u8, u8) {
    let r = (a.0 as u32 * (1000 - t) + b.0 as u32 * t) / 1000;
    let g = (a.1 as u32 * (1000 - t) + b.1 as u32 * t) / 1000;
    let b_val = (a.2 as u32 * (1000 - t) + b.2 as u32 * t) / 1000;
    (r as u8, g as u8, b_val as u8)
}

pub fn print_goodbye() {
    println!("\n{} {}", SPARKLE, style("お疲れさまでした。").bold().cyan());
}
