use console::style;

/// Styling helpers for terminal output
pub fn bright_yellow(text: impl std::fmt::Display) -> console::StyledObject<String> {
    style(text.to_string()).bright().yellow()
}

pub fn bright_green(text: impl std::fmt::Display) -> console::StyledObject<String> {
    style(text.to_string()).bright().green()
}

pub fn cyan(text: impl std::fmt::Display) -> console::StyledObject<String> {
    style(text.to_string()).cyan()
}

pub fn dim(text: impl std::fmt::Display) -> console::StyledObject<String> {
    style(text.to_string()).dim()
}

pub fn bright(text: impl std::fmt::Display) -> console::StyledObject<String> {
    style(text.to_string()).bright()
}

pub fn magenta_bold(text: impl std::fmt::Display) -> console::StyledObject<String> {
    style(text.to_string()).magenta().bold()
}

/// Shortens every dash-separated word to four characters,
/// e.g. `build-docker-image` → `buil-dock-imag`.
pub fn abbreviate(name: &str) -> String {
    name.split('-')
        .map(|word| word.chars().take(4).collect::<String>())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abbreviate_dash_words() {
        assert_eq!(abbreviate("build-docker-image"), "buil-dock-imag");
        assert_eq!(abbreviate("lint"), "lint");
        assert_eq!(abbreviate("e2e-über-long"), "e2e-über-long");
        assert_eq!(abbreviate("integration--tests"), "inte--test");
    }
}
