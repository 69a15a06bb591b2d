//! Size-profile selection at startup.
//!
//! The active profiles come from one of three places, in priority order:
//!
//! 1. `--profiles a,b` on the command line
//! 2. `selection.active` when `selection.mode = "static"`
//! 3. an interactive prompt when `selection.mode = "interactive"`
//!
//! Whatever the source, an empty selection is rejected here, before the
//! coordinator touches any directory.

use crate::config::{Config, ConfigError, SelectionMode, SizeProfile};
use std::io::{BufRead, Write};

/// Chooses which size profiles are active.
pub trait ProfileSelector {
    /// Return the selected profile names. `preselected` is offered as the
    /// default answer.
    fn select(
        &mut self,
        profiles: &[SizeProfile],
        preselected: &[String],
    ) -> Result<Vec<String>, ConfigError>;
}

/// Terminal multi-select over any reader/writer pair.
///
/// Accepts profile numbers or names separated by commas or spaces. An empty
/// answer takes the preselected profiles, or is rejected with a message
/// when there are none.
pub struct PromptSelector<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> PromptSelector<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn print_menu(&mut self, profiles: &[SizeProfile], preselected: &[String]) -> std::io::Result<()> {
        writeln!(self.output, "Select output sizes:")?;
        for (i, profile) in profiles.iter().enumerate() {
            let sizes: Vec<String> = profile.sizes.iter().map(|s| s.to_string()).collect();
            let marker = if preselected.contains(&profile.name) {
                " *"
            } else {
                ""
            };
            writeln!(
                self.output,
                "  {}) {} [{}]{}",
                i + 1,
                profile.name,
                sizes.join(", "),
                marker
            )?;
        }
        Ok(())
    }
}

impl PromptSelector<std::io::StdinLock<'static>, std::io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stdout())
    }
}

/// Parse one answer line into profile names.
///
/// Tokens are 1-based menu numbers or profile names. Repeats collapse.
pub fn parse_answer(line: &str, profiles: &[SizeProfile]) -> Result<Vec<String>, String> {
    let mut chosen: Vec<String> = Vec::new();
    for token in line
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
    {
        let name = match token.parse::<usize>() {
            Ok(n) if n >= 1 && n <= profiles.len() => profiles[n - 1].name.clone(),
            Ok(n) => return Err(format!("No profile numbered {n}")),
            Err(_) => profiles
                .iter()
                .find(|p| p.name == token)
                .map(|p| p.name.clone())
                .ok_or_else(|| format!("Unknown profile '{token}'"))?,
        };
        if !chosen.contains(&name) {
            chosen.push(name);
        }
    }
    Ok(chosen)
}

impl<R: BufRead, W: Write> ProfileSelector for PromptSelector<R, W> {
    fn select(
        &mut self,
        profiles: &[SizeProfile],
        preselected: &[String],
    ) -> Result<Vec<String>, ConfigError> {
        if profiles.is_empty() {
            return Err(ConfigError::EmptySelection);
        }
        self.print_menu(profiles, preselected)?;

        loop {
            if preselected.is_empty() {
                write!(self.output, "Selection: ")?;
            } else {
                write!(self.output, "Selection [{}]: ", preselected.join(","))?;
            }
            self.output.flush()?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Err(ConfigError::EmptySelection);
            }

            match parse_answer(&line, profiles) {
                Ok(chosen) if !chosen.is_empty() => return Ok(chosen),
                Ok(_) if !preselected.is_empty() => return Ok(preselected.to_vec()),
                Ok(_) => writeln!(self.output, "Please select at least one size profile.")?,
                Err(msg) => writeln!(self.output, "{msg}")?,
            }
        }
    }
}

/// Validate an explicit list of profile names against the config.
fn check_names(config: &Config, names: &[String]) -> Result<Vec<String>, ConfigError> {
    if names.is_empty() {
        return Err(ConfigError::EmptySelection);
    }
    for name in names {
        if !config.profiles.iter().any(|p| &p.name == name) {
            return Err(ConfigError::UnknownProfile(name.clone()));
        }
    }
    Ok(names.to_vec())
}

/// Determine the active profiles for this process.
///
/// `forced` comes from the command line and bypasses both the configured
/// mode and the selector.
pub fn resolve_selection(
    config: &Config,
    forced: Option<&[String]>,
    selector: &mut dyn ProfileSelector,
) -> Result<Vec<String>, ConfigError> {
    let selected = match (forced, config.selection.mode) {
        (Some(names), _) => names.to_vec(),
        (None, SelectionMode::Static) => config.selection.active.clone(),
        (None, SelectionMode::Interactive) => {
            selector.select(&config.profiles, &config.selection.active)?
        }
    };
    check_names(config, &selected)
}
