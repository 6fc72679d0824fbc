use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::log::LogLevel;
use crate::util::expand_braces;
use crate::{pwlog_debug, Error, Result};

/// File looked up in the working directory when `--config` is not given.
pub const CONFIG_FILE: &str = "pipewright.toml";

/// Source globs, relative to `root`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StylePaths {
    /// Entry stylesheets compiled into the style guide.
    pub src: String,
    /// Stylesheets compiled by `sass` and watched by `serve`.
    pub watch: String,
    /// Images optimised by `imgmin`.
    pub img_src: String,
    /// Optimised images copied into the style guide. Defaults to
    /// `<dest>/img/**/*.*`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub img_move: Option<String>,
    /// Generator stylesheets removed from the style guide. Defaults to
    /// `<doc>/**/*.scss`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_scss: Option<String>,
}

impl Default for StylePaths {
    fn default() -> Self {
        Self {
            src: "static/**/*.{scss,sass}".to_string(),
            watch: "**/frontend/**/*.{scss,sass}".to_string(),
            img_src: "**/frontend/**/img/**/*.*".to_string(),
            img_move: None,
            doc_scss: None,
        }
    }
}

/// External programs, as argument vectors with `{placeholder}` slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub sass: Vec<String>,
    pub autoprefix: Vec<String>,
    pub minify: Vec<String>,
    /// Image optimiser per lowercase file extension. Unlisted extensions are copied.
    pub images: BTreeMap<String, Vec<String>>,
    pub styleguide: Vec<String>,
    pub styleguide_title: String,
    pub browsersync: Vec<String>,
    pub reload: Vec<String>,
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        let mut images = BTreeMap::new();
        images.insert("png".to_string(), argv(&["pngquant", "--quality=65-80", "-"]));
        images.insert("jpg".to_string(), argv(&["jpegtran", "-progressive", "-optimize"]));
        images.insert("jpeg".to_string(), argv(&["jpegtran", "-progressive", "-optimize"]));
        images.insert("gif".to_string(), argv(&["gifsicle", "-O2"]));
        images.insert("svg".to_string(), argv(&["svgo", "-i", "-", "-o", "-"]));

        Self {
            sass: argv(&["sass", "--no-source-map", "{file}"]),
            autoprefix: argv(&["postcss", "--use", "autoprefixer"]),
            minify: argv(&["cleancss"]),
            images,
            styleguide: argv(&[
                "kss",
                "--source",
                "{src}",
                "--destination",
                "{dest}",
                "--title",
                "{title}",
            ]),
            styleguide_title: "My Styleguide".to_string(),
            browsersync: argv(&["browser-sync", "start", "--proxy", "{proxy}", "--no-open"]),
            reload: argv(&["browser-sync", "reload"]),
        }
    }
}

/// Failure notification settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Deliver failures as desktop notifications when a notifier binary exists.
    pub desktop: bool,
    pub title: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            desktop: true,
            title: "Compile Error".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Project root; other relative paths hang off it.
    pub root: PathBuf,
    /// Build output directory.
    pub dest: PathBuf,
    /// Generated style guide directory.
    pub doc: PathBuf,
    /// Address of the application server proxied by `serve`.
    pub proxy: String,
    /// Task run when none is named on the command line.
    pub default_task: String,
    /// Quiet window after the first change of a burst.
    pub debounce_ms: u64,
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    /// Autoprefixer targets, exported as `BROWSERSLIST`.
    pub browsers: Vec<String>,
    pub styles: StylePaths,
    pub tools: ToolsConfig,
    pub notify: NotifyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            dest: PathBuf::from("static"),
            doc: PathBuf::from("sass-doc"),
            proxy: "localhost:8000".to_string(),
            default_task: "default".to_string(),
            debounce_ms: 100,
            log_level: None,
            log_file: None,
            browsers: vec!["last 3 versions".to_string(), "IE 8".to_string()],
            styles: StylePaths::default(),
            tools: ToolsConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, `pipewright.toml` in the
    /// working directory is used if present, defaults otherwise. A relative
    /// `root` is resolved against the directory holding the file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let candidate = PathBuf::from(CONFIG_FILE);
                if !candidate.exists() {
                    pwlog_debug!("Config file not found, using defaults");
                    let config = Self::default();
                    config.validate()?;
                    return Ok(config);
                }
                candidate
            }
        };

        pwlog_debug!("Config::load path={}", path.display());
        let mut config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        config.root = expand_tilde(&config.root.to_string_lossy())?;
        if config.root.is_relative() {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                config.root = dir.join(&config.root);
            }
        }
        config.validate()?;
        pwlog_debug!(
            "Config loaded: root={}, dest={}, default_task={}",
            config.root.display(),
            config.dest.display(),
            config.default_task
        );
        Ok(config)
    }

    /// Check option values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        if self.default_task.trim().is_empty() {
            return Err(Error::Validation("default_task must not be empty".into()));
        }

        validate_proxy(&self.proxy)?;

        let styles = &self.styles;
        let optional = [&styles.img_move, &styles.doc_scss];
        for pattern in [&styles.src, &styles.watch, &styles.img_src]
            .into_iter()
            .chain(optional.into_iter().flatten())
        {
            for alternative in expand_braces(pattern) {
                glob::Pattern::new(&alternative)?;
            }
        }

        let tools = &self.tools;
        for (name, args) in [
            ("sass", &tools.sass),
            ("autoprefix", &tools.autoprefix),
            ("minify", &tools.minify),
            ("styleguide", &tools.styleguide),
            ("browsersync", &tools.browsersync),
            ("reload", &tools.reload),
        ] {
            if args.is_empty() || args[0].trim().is_empty() {
                return Err(Error::Validation(format!("tools.{} needs a program", name)));
            }
        }
        for (ext, args) in &tools.images {
            if args.is_empty() {
                return Err(Error::Validation(format!("tools.images.{} needs a program", ext)));
            }
        }

        if let Some(level) = &self.log_level {
            level.parse::<LogLevel>().map_err(Error::Validation)?;
        }

        Ok(())
    }

    /// Resolve a path relative to the project root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Absolute glob for a root-relative pattern.
    pub fn pattern(&self, pattern: &str) -> String {
        self.root.join(pattern).to_string_lossy().into_owned()
    }

    pub fn dest_dir(&self) -> PathBuf {
        self.resolve(&self.dest)
    }

    pub fn css_dest(&self) -> PathBuf {
        self.dest_dir().join("css")
    }

    pub fn img_dest(&self) -> PathBuf {
        self.dest_dir().join("img")
    }

    /// Optimised images copied into the style guide.
    pub fn img_move(&self) -> String {
        match &self.styles.img_move {
            Some(pattern) => self.pattern(pattern),
            None => self.img_dest().join("**").join("*.*").to_string_lossy().into_owned(),
        }
    }

    pub fn doc_dir(&self) -> PathBuf {
        self.resolve(&self.doc)
    }

    pub fn doc_static(&self) -> PathBuf {
        self.doc_dir().join("static")
    }

    /// Sources the doc generator leaves behind in the style guide.
    pub fn doc_scss(&self) -> String {
        match &self.styles.doc_scss {
            Some(pattern) => self.pattern(pattern),
            None => self.doc_dir().join("**").join("*.scss").to_string_lossy().into_owned(),
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Parsed `log_level`; `validate` guarantees it parses.
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level.as_deref().and_then(|l| l.parse().ok())
    }

    /// `log_file` with a leading `~/` expanded.
    ///
    /// # Errors
    /// [`Error::NoHomeDir`] when the path starts with `~/` and no home
    /// directory is known.
    pub fn log_file(&self) -> Result<Option<PathBuf>> {
        self.log_file.as_deref().map(expand_tilde).transpose()
    }
}

fn validate_proxy(proxy: &str) -> Result<()> {
    let invalid = || Error::Validation(format!("proxy must be host:port, got '{}'", proxy));
    let (host, port) = proxy.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() {
        return Err(invalid());
    }
    port.parse::<u16>().map_err(|_| invalid())?;
    Ok(())
}

fn expand_tilde(path: &str) -> Result<PathBuf> {
    expand_tilde_in(path, dirs::home_dir())
}

fn expand_tilde_in(path: &str, home: Option<PathBuf>) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => Ok(home.ok_or(Error::NoHomeDir)?.join(rest)),
        None => Ok(PathBuf::from(path)),
    }
}
