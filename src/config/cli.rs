//! CLI configuration file (`jboss-cli.xml`).
//!
//! The document is rooted at `jboss-cli` in one of the supported schema
//! namespaces. Values of the form `${name}` are resolved through a property
//! lookup at parse time. Missing files fall back to defaults.

use std::path::{Path, PathBuf};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, info, warn};

/// File name searched for during discovery.
pub const CLI_CONFIG_FILE: &str = "jboss-cli.xml";
/// Environment variable naming an explicit CLI config file.
pub const CLI_CONFIG_ENV_VAR: &str = "FLEET_CLI_CONFIG";
/// Environment variable naming the installation root; `bin/` is searched.
pub const HOME_ENV_VAR: &str = "FLEET_HOME";

const ROOT_ELEMENT: &str = "jboss-cli";

/// Supported schema versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliNamespace {
    V1_0,
    V1_1,
}

impl CliNamespace {
    pub fn uri(&self) -> &'static str {
        match self {
            CliNamespace::V1_0 => "urn:jboss:cli:1.0",
            CliNamespace::V1_1 => "urn:jboss:cli:1.1",
        }
    }

    fn for_uri(uri: &str) -> Option<Self> {
        [CliNamespace::V1_0, CliNamespace::V1_1]
            .into_iter()
            .find(|ns| ns.uri() == uri)
    }
}

/// A `${name}` placeholder with no value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Failed to resolve '{name}' to a non-null value")]
pub struct ConfigResolutionError {
    pub name: String,
}

/// Errors loading or parsing the CLI config file.
#[derive(Debug, thiserror::Error)]
pub enum CliConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed CLI config: {0}")]
    Xml(String),

    #[error("Unexpected element: {0}")]
    UnexpectedElement(String),

    #[error("Unexpected child of {parent}: {child}")]
    UnexpectedChild { parent: String, child: String },

    #[error("Failed to parse {element} value '{value}'")]
    InvalidNumber { element: String, value: String },

    #[error(transparent)]
    Resolution(#[from] ConfigResolutionError),
}

impl From<quick_xml::Error> for CliConfigError {
    fn from(e: quick_xml::Error) -> Self {
        CliConfigError::Xml(e.to_string())
    }
}

/// SSL settings for the management connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SslConfig {
    pub alias: Option<String>,
    pub key_store: Option<String>,
    pub key_store_password: Option<String>,
    pub key_password: Option<String>,
    pub trust_store: Option<String>,
    pub trust_store_password: Option<String>,
    pub modify_trust_store: bool,
}

impl Default for SslConfig {
    fn default() -> Self {
        Self {
            alias: None,
            key_store: None,
            key_store_password: None,
            key_password: None,
            trust_store: None,
            trust_store_password: None,
            modify_trust_store: true,
        }
    }
}

/// Settings read from the CLI config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliConfig {
    pub default_controller_host: String,
    pub default_controller_port: u16,
    pub history_enabled: bool,
    pub history_file_name: String,
    pub history_file_dir: String,
    pub history_max_size: u32,
    /// Management connection timeout in milliseconds.
    pub connection_timeout: u64,
    pub validate_operation_requests: bool,
    pub resolve_parameter_values: bool,
    pub silent: bool,
    pub ssl: Option<SslConfig>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            default_controller_host: "localhost".to_string(),
            default_controller_port: 9999,
            history_enabled: true,
            history_file_name: ".jboss-cli-history".to_string(),
            history_file_dir: std::env::var("HOME").unwrap_or_default(),
            history_max_size: 500,
            connection_timeout: 5000,
            validate_operation_requests: true,
            resolve_parameter_values: false,
            silent: false,
            ssl: None,
        }
    }
}

impl CliConfig {
    /// Discover and load the CLI config file.
    ///
    /// Search order:
    /// 1. File named by `FLEET_CLI_CONFIG`
    /// 2. `jboss-cli.xml` in the current directory
    /// 3. `$FLEET_HOME/bin/jboss-cli.xml`
    ///
    /// Falls back to defaults when nothing is found.
    pub fn load() -> Result<Self, CliConfigError> {
        let current_dir = std::env::current_dir().ok();
        match discover(env_lookup, current_dir.as_deref()) {
            Some(path) => Self::load_from(&path),
            None => {
                warn!("Can't find {}, using default configuration values", CLI_CONFIG_FILE);
                Ok(Self::default())
            }
        }
    }

    /// Load from `path`; a path that does not exist yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, CliConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "CLI config file does not exist, using defaults");
            return Ok(Self::default());
        }
        let xml = std::fs::read_to_string(path).map_err(|source| CliConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&xml)?;
        info!(path = %path.display(), "Loaded CLI config");
        Ok(config)
    }

    /// Parse a document, resolving placeholders from the environment.
    pub fn parse(xml: &str) -> Result<Self, CliConfigError> {
        Self::parse_with(xml, env_lookup)
    }

    /// Parse a document, resolving placeholders through `lookup`.
    pub fn parse_with<F>(xml: &str, lookup: F) -> Result<Self, CliConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let root = Element::read_document(xml)?;
        if root.name != ROOT_ELEMENT {
            return Err(CliConfigError::UnexpectedElement(root.name));
        }
        let namespace = root
            .namespace
            .as_deref()
            .and_then(CliNamespace::for_uri)
            .ok_or_else(|| CliConfigError::UnexpectedElement(root.name.clone()))?;

        let parser = Parser { namespace, lookup };
        parser.read_root(&root)
    }
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// First existing CLI config file in discovery order.
///
/// An explicitly named file is returned even when it does not exist.
pub fn discover<F>(env: F, current_dir: Option<&Path>) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(explicit) = env(CLI_CONFIG_ENV_VAR) {
        return Some(PathBuf::from(explicit));
    }
    if let Some(candidate) = current_dir.map(|dir| dir.join(CLI_CONFIG_FILE)) {
        if candidate.exists() {
            return Some(candidate);
        }
    }
    env(HOME_ENV_VAR)
        .map(|home| Path::new(&home).join("bin").join(CLI_CONFIG_FILE))
        .filter(|candidate| candidate.exists())
}

/// Minimal element tree; the document is small and read in full.
#[derive(Debug)]
struct Element {
    name: String,
    namespace: Option<String>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn open(start: &BytesStart<'_>, parent_namespace: Option<&str>) -> Result<Self, CliConfigError> {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let mut namespace = parent_namespace.map(str::to_string);
        for attr in start.attributes() {
            let attr = attr.map_err(|e| CliConfigError::Xml(e.to_string()))?;
            if attr.key.as_ref() == b"xmlns" {
                namespace = Some(attr.unescape_value()?.into_owned());
            }
        }
        Ok(Self {
            name,
            namespace,
            text: String::new(),
            children: Vec::new(),
        })
    }

    fn read_document(xml: &str) -> Result<Self, CliConfigError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();
        let mut stack: Vec<Element> = Vec::new();
        let mut root = None;

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) => {
                    let parent_ns = stack.last().and_then(|p| p.namespace.as_deref());
                    let element = Element::open(&e, parent_ns)?;
                    stack.push(element);
                }
                Event::Empty(e) => {
                    let parent_ns = stack.last().and_then(|p| p.namespace.as_deref());
                    let element = Element::open(&e, parent_ns)?;
                    attach(&mut stack, &mut root, element);
                }
                Event::Text(e) => {
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&e.unescape()?);
                    }
                }
                Event::CData(e) => {
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&String::from_utf8_lossy(e.as_ref()));
                    }
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| CliConfigError::Xml("unbalanced end tag".to_string()))?;
                    attach(&mut stack, &mut root, element);
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        root.ok_or_else(|| CliConfigError::Xml("document has no root element".to_string()))
    }
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => *root = Some(element),
    }
}

struct Parser<F> {
    namespace: CliNamespace,
    lookup: F,
}

impl<F> Parser<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn read_root(&self, root: &Element) -> Result<CliConfig, CliConfigError> {
        let mut config = CliConfig::default();

        for child in &root.children {
            self.expect_namespace(child)?;
            match child.name.as_str() {
                "default-controller" => self.read_default_controller(child, &mut config)?,
                "history" => self.read_history(child, &mut config)?,
                "ssl" => config.ssl = Some(self.read_ssl(child)?),
                "connection-timeout" => {
                    let value = self.resolve(child)?;
                    config.connection_timeout =
                        parse_number(ROOT_ELEMENT, "connection-timeout", &value)?;
                }
                "validate-operation-requests" => {
                    config.validate_operation_requests = parse_bool(&self.resolve(child)?)
                }
                "resolve-parameter-values" => {
                    config.resolve_parameter_values = parse_bool(&self.resolve(child)?)
                }
                "silent" => config.silent = parse_bool(&self.resolve(child)?),
                other => return Err(CliConfigError::UnexpectedElement(other.to_string())),
            }
        }
        Ok(config)
    }

    fn read_default_controller(&self, element: &Element, config: &mut CliConfig) -> Result<(), CliConfigError> {
        for child in &element.children {
            self.expect_namespace(child)?;
            let value = self.resolve(child)?;
            match child.name.as_str() {
                "host" => config.default_controller_host = value,
                "port" => config.default_controller_port = parse_number(&element.name, "port", &value)?,
                _ => return Err(unexpected_child(element, child)),
            }
        }
        Ok(())
    }

    fn read_history(&self, element: &Element, config: &mut CliConfig) -> Result<(), CliConfigError> {
        for child in &element.children {
            self.expect_namespace(child)?;
            let value = self.resolve(child)?;
            match child.name.as_str() {
                "enabled" => config.history_enabled = parse_bool(&value),
                "file-name" => config.history_file_name = value,
                "file-dir" => config.history_file_dir = value,
                "max-size" => config.history_max_size = parse_number(&element.name, "max-size", &value)?,
                _ => return Err(unexpected_child(element, child)),
            }
        }
        Ok(())
    }

    /// 1.0 accepts only the camelCase names; 1.1 adds the hyphenated forms
    /// plus `alias` and `key-password`.
    fn read_ssl(&self, element: &Element) -> Result<SslConfig, CliConfigError> {
        let mut ssl = SslConfig::default();
        for child in &element.children {
            self.expect_namespace(child)?;
            let name = match (self.namespace, child.name.as_str()) {
                (CliNamespace::V1_0, "keyStore" | "keyStorePassword" | "trustStore" | "trustStorePassword" | "modifyTrustStore") => {
                    child.name.as_str()
                }
                (CliNamespace::V1_0, _) => return Err(unexpected_child(element, child)),
                (CliNamespace::V1_1, name) => canonical_ssl_name(name).ok_or_else(|| unexpected_child(element, child))?,
            };

            let value = self.resolve(child)?;
            match name {
                "alias" => ssl.alias = Some(value),
                "keyStore" => ssl.key_store = Some(value),
                "keyStorePassword" => ssl.key_store_password = Some(value),
                "keyPassword" => ssl.key_password = Some(value),
                "trustStore" => ssl.trust_store = Some(value),
                "trustStorePassword" => ssl.trust_store_password = Some(value),
                "modifyTrustStore" => ssl.modify_trust_store = parse_bool(&value),
                _ => return Err(unexpected_child(element, child)),
            }
        }
        Ok(ssl)
    }

    fn expect_namespace(&self, element: &Element) -> Result<(), CliConfigError> {
        if element.namespace.as_deref() == Some(self.namespace.uri()) {
            Ok(())
        } else {
            Err(CliConfigError::UnexpectedElement(element.name.clone()))
        }
    }

    /// Element text, with a whole-value `${name}` placeholder resolved.
    fn resolve(&self, element: &Element) -> Result<String, ConfigResolutionError> {
        let text = element.text.as_str();
        match text.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
            Some(name) => (self.lookup)(name).ok_or_else(|| ConfigResolutionError {
                name: name.to_string(),
            }),
            None => Ok(text.to_string()),
        }
    }
}

fn canonical_ssl_name(name: &str) -> Option<&'static str> {
    Some(match name {
        "alias" => "alias",
        "key-store" | "keyStore" => "keyStore",
        "key-store-password" | "keyStorePassword" => "keyStorePassword",
        "key-password" | "keyPassword" => "keyPassword",
        "trust-store" | "trustStore" => "trustStore",
        "trust-store-password" | "trustStorePassword" => "trustStorePassword",
        "modify-trust-store" | "modifyTrustStore" => "modifyTrustStore",
        _ => return None,
    })
}

fn unexpected_child(parent: &Element, child: &Element) -> CliConfigError {
    CliConfigError::UnexpectedChild {
        parent: parent.name.clone(),
        child: child.name.clone(),
    }
}

/// Only a case-insensitive `true` is true.
fn parse_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("true")
}

fn parse_number<T: std::str::FromStr>(parent: &str, element: &str, value: &str) -> Result<T, CliConfigError> {
    value.parse().map_err(|_| CliConfigError::InvalidNumber {
        element: format!("{} {}", parent, element),
        value: value.to_string(),
    })
}
