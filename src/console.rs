//! Colorful console output for solve progress.

use num_format::{Locale, ToFormattedString};
use owo_colors::OwoColorize;
use std::time::Duration;

use crate::engine::{Part, Satisfiability, SolveOutcome};
use crate::facts::{CostVector, Instance, Model};

/// ASCII art banner for solver startup.
pub fn print_banner() {
    let banner = r#"
  _____ _           _
 |  ___| | ___  ___| |_
 | |_  | |/ _ \/ _ \ __|
 |  _| | |  __/  __/ |_
 |_|   |_|\___|\___|\__|
"#;
    println!("{}", banner.cyan().bold());
    println!(
        "  {} {}\n",
        format!("v{}", env!("CARGO_PKG_VERSION")).bright_black(),
        "Fleet Scheduling".bright_cyan()
    );
}

/// Prints the instance summary.
pub fn print_config(instance: &Instance) {
    println!(
        "{} {} {} Instance: nodes ({}), arcs ({}), demands ({}), vehicles ({}), months ({}), horizon ({})",
        timestamp().bright_black(),
        "INFO".bright_green(),
        "[Solver]".bright_cyan(),
        instance.count("node").to_formatted_string(&Locale::en).bright_yellow(),
        instance.count("arc").to_formatted_string(&Locale::en).bright_yellow(),
        instance.count("demand").to_formatted_string(&Locale::en).bright_yellow(),
        instance.count("vehicle").to_formatted_string(&Locale::en).bright_yellow(),
        instance.count("month").to_formatted_string(&Locale::en).bright_yellow(),
        instance
            .horizon()
            .map(|h| h.to_string())
            .unwrap_or_else(|| "-".to_string())
            .bright_yellow()
    );
}

/// States that models come from the in-process dispatcher, not a declarative engine.
pub fn print_simulation_notice() {
    println!(
        "{} {} {} Simulated run: models are produced by the built-in greedy dispatcher",
        timestamp().bright_black(),
        "WARN".bright_yellow(),
        "[Solver]".bright_cyan(),
    );
}

/// Prints a period header in iterative mode.
pub fn print_period_start(period: u32, periods: u32, budget: Duration) {
    println!(
        "{} {} {} Period {} of {} started, budget ({})",
        timestamp().bright_black(),
        "INFO".bright_green(),
        format!("[Period {}]", period).bright_cyan(),
        period.to_string().white().bold(),
        periods.to_string().yellow(),
        format_duration(budget).yellow()
    );
}

pub fn print_grounding(parts: &[Part]) {
    let parts: Vec<String> = parts.iter().map(Part::to_string).collect();
    println!("Grounding… {}", parts.join(" ").bright_black());
}

pub fn print_solving() {
    println!("Solving…");
}

/// Prints a model line, the model itself when verbose, and its cost.
pub fn print_model(model: &Model, verbose: bool) {
    println!(
        "{} {}",
        format!("Model: {}", model.number).bright_green(),
        format!("({:.3}s)", model.elapsed.as_secs_f64()).yellow()
    );
    if verbose {
        let facts: Vec<String> = model.facts.iter().map(|fact| fact.to_string()).collect();
        println!("{}", facts.join(" "));
    }
    if !model.cost.is_empty() {
        println!("Cost: {}", format_cost(&model.cost));
    }
}

pub fn print_outcome(outcome: &SolveOutcome) {
    println!("{}", format_outcome(outcome));
}

/// Prints the run summary box.
pub fn print_run_ended(total_duration: Duration, outcome: &SolveOutcome, model: Option<&Model>, periods: Option<usize>) {
    // 60 chars wide, 56 char content area
    println!();
    println!("{}", "╔══════════════════════════════════════════════════════════╗".bright_cyan());

    let status_text = match outcome.satisfiability {
        Satisfiability::Satisfiable => "✓ MODEL FOUND",
        Satisfiability::Unsatisfiable => "✗ UNSATISFIABLE",
        Satisfiability::Unknown => "? NO MODEL WITHIN BUDGET",
    };
    let status_colored = match outcome.satisfiability {
        Satisfiability::Satisfiable => status_text.bright_green().bold().to_string(),
        Satisfiability::Unsatisfiable => status_text.bright_red().bold().to_string(),
        Satisfiability::Unknown => status_text.yellow().bold().to_string(),
    };
    let status_padding = 56usize.saturating_sub(status_text.chars().count());
    let left_pad = status_padding / 2;
    let right_pad = status_padding - left_pad;
    println!(
        "{}{}{}{}{}",
        "║".bright_cyan(),
        " ".repeat(left_pad),
        status_colored,
        " ".repeat(right_pad),
        "║".bright_cyan()
    );

    println!("{}", "╠══════════════════════════════════════════════════════════╣".bright_cyan());

    let cost_str = model
        .map(|m| m.cost.to_string())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| "-".to_string());
    print_row("Cost:", &cost_str);
    let facts_str = model
        .map(|m| m.facts.len().to_formatted_string(&Locale::en))
        .unwrap_or_else(|| "-".to_string());
    print_row("Model Facts:", &facts_str);
    if let Some(periods) = periods {
        print_row("Periods Solved:", &periods.to_string());
    }
    print_row("Solving Time:", &format!("{:.2}s", total_duration.as_secs_f64()));

    println!("{}", "╚══════════════════════════════════════════════════════════╝".bright_cyan());
    println!();
}

fn print_row(label: &str, value: &str) {
    println!(
        "{}  {:<18}{:>36}  {}",
        "║".bright_cyan(),
        label,
        value,
        "║".bright_cyan()
    );
}

/// Formats a duration nicely.
pub fn format_duration(d: Duration) -> String {
    let total_ms = d.as_millis();
    if total_ms < 1000 {
        format!("{}ms", total_ms)
    } else if total_ms < 60_000 {
        format!("{:.2}s", d.as_secs_f64())
    } else {
        let mins = total_ms / 60_000;
        let secs = (total_ms % 60_000) / 1000;
        format!("{}m {}s", mins, secs)
    }
}

fn format_cost(cost: &CostVector) -> String {
    cost.as_slice()
        .iter()
        .map(|criterion| criterion.to_string().bright_magenta().to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_outcome(outcome: &SolveOutcome) -> String {
    let text = outcome.to_string();
    match outcome.satisfiability {
        Satisfiability::Satisfiable => text.bright_green().to_string(),
        Satisfiability::Unsatisfiable => text.bright_red().to_string(),
        Satisfiability::Unknown => text.yellow().to_string(),
    }
}

/// Returns a timestamp string.
fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S%.3f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
        assert_eq!(format_duration(Duration::from_secs(300)), "5m 0s");
    }

    #[test]
    fn test_timestamp_shape() {
        let stamp = timestamp();
        assert_eq!(stamp.len(), "12:34:56.789".len());
        assert_eq!(stamp.matches(':').count(), 2);
    }
}
