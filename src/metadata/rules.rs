//! Metadata rules: turn a raw `StreamTitle` into structured track fields.
//!
//! A rules source holds one rule per line; blank lines and lines starting
//! with `#` are ignored.
//!
//! ```text
//! m/<regex>/<flags>          match
//! s/<regex>/<replacement>/<flags>   substitute
//! ```
//!
//! Flags: `i` case-insensitive, `g` replace every occurrence (substitute
//! only), `e` exclude the track, `s` save the track, `x` skip the track.
//! Capture mappings `A<n>`, `T<n>`, `C<n>`, `N<n>`, `Y<n>` copy group `n`
//! into artist, title, album, track number and year. Named groups
//! `artist`, `title`, `album`, `track` and `year` are mapped automatically.
//! A `/` inside a pattern is written `\/`; `\1` in a replacement refers to
//! group 1.

use regex::{Captures, Regex, RegexBuilder};

use crate::config::RulesSource;
use crate::MetadataError;

const DEFAULT_RULES: &str = r"
# Station identifiers and empty titles are not tracks.
m/^\s*$/x
# Tidy whitespace before splitting.
s/^\s+//
s/\s+$//
s/\s{2,}/ /g
# Artist - Title
m/^(?P<artist>.+?)\s+-\s+(?P<title>.+)$/
";

/// Which track field a capture group feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Artist,
    Title,
    Album,
    Track,
    Year,
}

impl Field {
    fn from_flag(c: char) -> Option<Self> {
        match c {
            'A' => Some(Self::Artist),
            'T' => Some(Self::Title),
            'C' => Some(Self::Album),
            'N' => Some(Self::Track),
            'Y' => Some(Self::Year),
            _ => None,
        }
    }

    fn from_group_name(name: &str) -> Option<Self> {
        match name {
            "artist" => Some(Self::Artist),
            "title" => Some(Self::Title),
            "album" => Some(Self::Album),
            "track" => Some(Self::Track),
            "year" => Some(Self::Year),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchAction {
    Capture,
    Exclude,
    Save,
    Skip,
}

#[derive(Debug)]
enum Rule {
    Match {
        regex: Regex,
        action: MatchAction,
        captures: Vec<(Field, usize)>,
    },
    Substitute {
        regex: Regex,
        replacement: String,
        global: bool,
    },
}

/// Result of running the rules over one raw metadata string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedMetadata {
    /// Whether the track should be written out.
    pub save_track: bool,
    /// Artist, possibly empty.
    pub artist: String,
    /// Title, possibly empty.
    pub title: String,
    /// Album, possibly empty.
    pub album: String,
    /// Track number as text, possibly empty.
    pub track: String,
    /// Year as text, possibly empty.
    pub year: String,
}

impl ParsedMetadata {
    fn set(&mut self, field: Field, value: &str) {
        let slot = match field {
            Field::Artist => &mut self.artist,
            Field::Title => &mut self.title,
            Field::Album => &mut self.album,
            Field::Track => &mut self.track,
            Field::Year => &mut self.year,
        };
        *slot = value.trim().to_string();
    }

    fn is_empty(&self) -> bool {
        self.artist.is_empty()
            && self.title.is_empty()
            && self.album.is_empty()
            && self.track.is_empty()
            && self.year.is_empty()
    }
}

/// An ordered list of metadata rules.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// The built-in rules: skip empty titles, tidy whitespace, split on `" - "`.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the built-in text is parsed like any other.
    pub fn default_rules() -> Result<Self, MetadataError> {
        Self::parse(DEFAULT_RULES)
    }

    /// Loads the rules named by a [`RulesSource`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file can't be read or a rule doesn't parse.
    pub fn load(source: &RulesSource) -> Result<Self, MetadataError> {
        match source {
            RulesSource::Default => Self::default_rules(),
            RulesSource::Inline(text) => Self::parse(text),
            RulesSource::File(path) => {
                let text =
                    std::fs::read_to_string(path).map_err(|source| MetadataError::RulesFile {
                        path: path.clone(),
                        source,
                    })?;
                Self::parse(&text)
            }
        }
    }

    /// Parses rules from text, one per line.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::InvalidRule`] with the 1-based line number of
    /// the first rule that doesn't parse.
    pub fn parse(text: &str) -> Result<Self, MetadataError> {
        let mut rules = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let rule = parse_rule(line).map_err(|reason| MetadataError::InvalidRule {
                line: idx + 1,
                reason,
            })?;
            rules.push(rule);
        }
        Ok(Self { rules })
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns `true` if there are no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Runs the rules over `raw`.
    ///
    /// Evaluation stops at the first skip match (track dropped, fields
    /// empty) or the first capture match that yields a field. A save match
    /// anywhere overrides every exclude match. When nothing was captured the
    /// raw string becomes the title.
    pub fn evaluate(&self, raw: &str) -> ParsedMetadata {
        let mut working = raw.to_string();
        let mut parsed = ParsedMetadata::default();
        let mut excluded = false;
        let mut saved = false;

        for rule in &self.rules {
            match rule {
                Rule::Substitute {
                    regex,
                    replacement,
                    global,
                } => {
                    working = if *global {
                        regex.replace_all(&working, replacement.as_str()).into_owned()
                    } else {
                        regex.replace(&working, replacement.as_str()).into_owned()
                    };
                }
                Rule::Match {
                    regex,
                    action,
                    captures,
                } => match action {
                    MatchAction::Skip => {
                        if regex.is_match(&working) {
                            return ParsedMetadata::default();
                        }
                    }
                    MatchAction::Exclude => excluded |= regex.is_match(&working),
                    MatchAction::Save => saved |= regex.is_match(&working),
                    MatchAction::Capture => {
                        let Some(caps) = regex.captures(&working) else {
                            continue;
                        };
                        let mut candidate = ParsedMetadata::default();
                        apply_captures(regex, &caps, captures, &mut candidate);
                        if !candidate.is_empty() {
                            parsed = candidate;
                            break;
                        }
                    }
                },
            }
        }

        if parsed.is_empty() {
            parsed.title = raw.to_string();
        }
        parsed.save_track = saved || !excluded;
        parsed
    }
}

fn apply_captures(
    regex: &Regex,
    caps: &Captures<'_>,
    mappings: &[(Field, usize)],
    out: &mut ParsedMetadata,
) {
    for name in regex.capture_names().flatten() {
        if let (Some(field), Some(m)) = (Field::from_group_name(name), caps.name(name)) {
            out.set(field, m.as_str());
        }
    }
    for &(field, group) in mappings {
        if let Some(m) = caps.get(group) {
            out.set(field, m.as_str());
        }
    }
}

fn parse_rule(line: &str) -> Result<Rule, String> {
    let mut chars = line.chars();
    let kind = chars.next().ok_or("empty rule")?;
    let rest = chars.as_str();
    let body = rest
        .strip_prefix('/')
        .ok_or_else(|| format!("expected '/' after '{kind}'"))?;

    match kind {
        'm' => {
            let (pattern, tail) = split_field(body).ok_or("unterminated pattern")?;
            let flags = Flags::parse(tail)?;
            if flags.global {
                return Err("'g' only applies to substitutions".into());
            }
            let action = flags.action()?;
            let regex = build_regex(&pattern, flags.icase)?;
            for &(_, group) in &flags.captures {
                if group >= regex.captures_len() {
                    return Err(format!("capture group {group} does not exist"));
                }
            }
            Ok(Rule::Match {
                regex,
                action,
                captures: flags.captures,
            })
        }
        's' => {
            let (pattern, tail) = split_field(body).ok_or("unterminated pattern")?;
            let (replacement, tail) = split_field(tail).ok_or("unterminated replacement")?;
            let flags = Flags::parse(tail)?;
            if flags.action()? != MatchAction::Capture || !flags.captures.is_empty() {
                return Err("substitutions only accept 'i' and 'g'".into());
            }
            Ok(Rule::Substitute {
                regex: build_regex(&pattern, flags.icase)?,
                replacement: convert_replacement(&replacement),
                global: flags.global,
            })
        }
        other => Err(format!("unknown rule type '{other}'")),
    }
}

/// Splits at the first unescaped `/`, unescaping `\/` in the returned field.
fn split_field(s: &str) -> Option<(String, &str)> {
    let mut out = String::new();
    let mut iter = s.char_indices();
    while let Some((i, c)) = iter.next() {
        match c {
            '\\' => match iter.next() {
                Some((_, '/')) => out.push('/'),
                Some((_, next)) => {
                    out.push('\\');
                    out.push(next);
                }
                None => out.push('\\'),
            },
            '/' => return Some((out, &s[i + 1..])),
            _ => out.push(c),
        }
    }
    None
}

/// Rewrites `\N` group references to the `${N}` form and escapes literal `$`.
fn convert_replacement(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek().is_some_and(char::is_ascii_digit) => {
                out.push_str("${");
                while let Some(d) = chars.next_if(char::is_ascii_digit) {
                    out.push(d);
                }
                out.push('}');
            }
            '$' => out.push_str("$$"),
            _ => out.push(c),
        }
    }
    out
}

fn build_regex(pattern: &str, icase: bool) -> Result<Regex, String> {
    RegexBuilder::new(pattern)
        .case_insensitive(icase)
        .build()
        .map_err(|e| e.to_string())
}

#[derive(Debug, Default)]
struct Flags {
    icase: bool,
    global: bool,
    exclude: bool,
    save: bool,
    skip: bool,
    captures: Vec<(Field, usize)>,
}

impl Flags {
    fn parse(s: &str) -> Result<Self, String> {
        let mut flags = Self::default();
        let mut chars = s.trim().chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                'i' => flags.icase = true,
                'g' => flags.global = true,
                'e' => flags.exclude = true,
                's' => flags.save = true,
                'x' => flags.skip = true,
                _ => {
                    let field = Field::from_flag(c).ok_or_else(|| format!("unknown flag '{c}'"))?;
                    let mut digits = String::new();
                    while let Some(d) = chars.next_if(char::is_ascii_digit) {
                        digits.push(d);
                    }
                    let group = digits
                        .parse::<usize>()
                        .map_err(|_| format!("flag '{c}' needs a group number"))?;
                    flags.captures.push((field, group));
                }
            }
        }
        Ok(flags)
    }

    fn action(&self) -> Result<MatchAction, String> {
        let set = [self.exclude, self.save, self.skip]
            .iter()
            .filter(|&&b| b)
            .count();
        if set > 1 {
            return Err("'e', 's' and 'x' are mutually exclusive".into());
        }
        if set == 1 && !self.captures.is_empty() {
            return Err("capture mappings can't be combined with 'e', 's' or 'x'".into());
        }
        Ok(if self.skip {
            MatchAction::Skip
        } else if self.exclude {
            MatchAction::Exclude
        } else if self.save {
            MatchAction::Save
        } else {
            MatchAction::Capture
        })
    }
}
