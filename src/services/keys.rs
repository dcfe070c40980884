use std::path::Path;
use std::sync::{Arc, OnceLock, RwLock};

use chrono::{DateTime, Datelike, Timelike, Utc};
use regex::Regex;

use crate::config::ShipperConfig;
use crate::services::identity::IdentifierProvider;

/// Extra path segment the embedding application may set, clear, or replace
/// between uploads. Shared by handle; all clones see the same value.
#[derive(Clone, Default)]
pub struct CustomTagStore {
    value: Arc<RwLock<Option<String>>>,
}

impl CustomTagStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, tag: impl Into<String>) {
        *self.value.write().unwrap() = Some(tag.into());
    }

    pub fn clear(&self) {
        *self.value.write().unwrap() = None;
    }

    pub fn get(&self) -> Option<String> {
        self.value.read().unwrap().clone()
    }
}

/// Builds the object key for one upload: expanded folder pattern, custom tag,
/// sortable timestamp, instance identifier, then the base filename.
pub struct ObjectKeyFormatter {
    folder_pattern: Option<String>,
    custom_tag: CustomTagStore,
    timestamp_prefix: bool,
    identifier_prefix: bool,
    identity: Arc<dyn IdentifierProvider>,
}

impl ObjectKeyFormatter {
    pub fn new(
        config: &ShipperConfig,
        custom_tag: CustomTagStore,
        identity: Arc<dyn IdentifierProvider>,
    ) -> Self {
        Self {
            folder_pattern: config.folder_pattern.clone(),
            custom_tag,
            timestamp_prefix: config.timestamp_prefix,
            identifier_prefix: config.identifier_prefix,
            identity,
        }
    }

    /// `override_timestamp` forces the timestamp prefix on even when the
    /// configuration leaves it off; shutdown uploads of the active file use
    /// this so repeated runs cannot overwrite each other.
    pub async fn format(
        &self,
        base_file: &Path,
        date: DateTime<Utc>,
        override_timestamp: bool,
    ) -> String {
        let mut key = String::new();

        if let Some(pattern) = &self.folder_pattern {
            key.push_str(&expand_date_tokens(pattern, date));
            key.push('/');
        }

        if let Some(tag) = self.custom_tag.get() {
            key.push_str(&tag);
            key.push('/');
        }

        if self.timestamp_prefix || override_timestamp {
            key.push_str(&date.format("%Y%m%d%H%M%S").to_string());
            key.push('_');
        }

        if self.identifier_prefix {
            key.push_str(&self.identity.identifier().await);
            key.push('_');
        }

        if let Some(name) = base_file.file_name() {
            key.push_str(&name.to_string_lossy());
        }

        key
    }
}

fn date_token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"%d\{([^}]*)\}").expect("date token regex is valid"))
}

/// Expands every `%d{pattern}` token in `pattern` using `date`. Text outside
/// tokens is untouched and an unterminated `%d{` stays literal.
pub fn expand_date_tokens(pattern: &str, date: DateTime<Utc>) -> String {
    date_token_regex()
        .replace_all(pattern, |caps: &regex::Captures<'_>| {
            render_date_pattern(&caps[1], date)
        })
        .into_owned()
}

/// Renders the date-format letters the folder patterns use (`yyyy`, `yy`,
/// `MM`, `dd`, `HH`, `mm`, `ss`, `SSS`), zero-padded to the run length.
/// Runs of any other character pass through verbatim.
fn render_date_pattern(pattern: &str, date: DateTime<Utc>) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let mut run = 1;
        while i + run < chars.len() && chars[i + run] == c {
            run += 1;
        }

        match c {
            'y' if run == 2 => out.push_str(&format!("{:02}", date.year() % 100)),
            'y' => out.push_str(&format!("{:0run$}", date.year())),
            'M' => out.push_str(&format!("{:0run$}", date.month())),
            'd' => out.push_str(&format!("{:0run$}", date.day())),
            'H' => out.push_str(&format!("{:0run$}", date.hour())),
            'm' => out.push_str(&format!("{:0run$}", date.minute())),
            's' => out.push_str(&format!("{:0run$}", date.second())),
            'S' => out.push_str(&format!("{:0run$}", date.timestamp_subsec_millis())),
            _ => {
                for _ in 0..run {
                    out.push(c);
                }
            }
        }

        i += run;
    }

    out
}
