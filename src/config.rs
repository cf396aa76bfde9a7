//! Optional features and the manifest of known host builds.
//!
//! Patches ship a small XML manifest next to the binary. It selects the optional features and
//! records, per host build, where the unexported symbols live:
//!
//! ```xml
//! <hostlink>
//!   <features>multiplayer,logging</features>
//!   <build version="1.0.3.279" sha1="3f786850e387550fdab836ed7e6dc881de23001b">
//!     <symbol name="lGetMemoryUsage" offset="0x2f1a0"/>
//!     <symbol name="SetActiveDLCAndMods" pattern="55 8B EC 6A FF 68 ?? ?? ?? ??" adjust="0"/>
//!   </build>
//! </hostlink>
//! ```
//!
//! Each `<build>` becomes a [`BuildProfile`]; [`Manifest::profile_for`] picks the one
//! matching the fingerprint of the host image that is actually loaded.

use std::{collections::HashMap, fs, path::Path, str::FromStr};

use bitflags::bitflags;
use quick_xml::{
    events::{BytesStart, Event},
    Reader,
};

use crate::{
    image::Signature,
    resolver::{BuildProfile, SymbolLocation},
    Error::{self, Config},
    Result,
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Optional patch features. Symbols only needed by one feature are tagged with it, so a
    /// host build lacking them degrades that feature instead of failing the whole patch.
    pub struct Features : u32 {
        /// Multiplayer support for mods and DLC
        const MULTIPLAYER = 0x0001;
        /// LuaJIT instead of the host's Lua
        const LUAJIT = 0x0002;
        /// Logging of host Lua calls
        const LOGGING = 0x0004;
        /// Debug helpers
        const DEBUG = 0x0008;
    }
}

impl Features {
    /// Parse a comma-separated, case-insensitive list of feature names.
    ///
    /// # Errors
    /// Returns [`crate::Error::Config`] for an unknown name.
    pub fn parse_list(list: &str) -> Result<Features> {
        let mut features = Features::empty();
        for name in list.split(',').map(str::trim).filter(|name| !name.is_empty()) {
            let Some(feature) = Features::from_name(&name.to_ascii_uppercase()) else {
                return Err(Config(format!("Unknown feature '{name}'")));
            };
            features |= feature;
        }
        Ok(features)
    }
}

impl FromStr for Features {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Features::parse_list(s)
    }
}

/// The parsed patch manifest.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Manifest {
    features: Features,
    profiles: Vec<BuildProfile>,
}

impl Default for Features {
    fn default() -> Self {
        Features::empty()
    }
}

impl Manifest {
    /// Read and parse the manifest at `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be read, or see
    /// [`Manifest::from_xml`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Manifest> {
        let xml = fs::read_to_string(path)?;
        Self::from_xml(&xml)
    }

    /// Parse a manifest document.
    ///
    /// # Errors
    /// Returns [`crate::Error::Config`] for malformed XML, unknown elements or attributes,
    /// missing attributes, bad numbers, bad signatures and unknown feature names.
    pub fn from_xml(xml: &str) -> Result<Manifest> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut manifest = Manifest::default();
        let mut open: Vec<String> = Vec::new();
        let mut build: Option<BuildProfile> = None;
        let mut seen_root = false;

        loop {
            let event = reader.read_event().map_err(|error| {
                Config(format!(
                    "Malformed manifest at byte {}: {error}",
                    reader.error_position()
                ))
            })?;

            match event {
                Event::Start(element) => {
                    let name = element_name(&element);
                    manifest.open_element(&name, &element, open.last(), &mut build, &mut seen_root)?;
                    open.push(name);
                }
                Event::Empty(element) => {
                    let name = element_name(&element);
                    manifest.open_element(&name, &element, open.last(), &mut build, &mut seen_root)?;
                    manifest.close_element(&name, &mut build);
                }
                Event::End(element) => {
                    let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
                    manifest.close_element(&name, &mut build);
                    open.pop();
                }
                Event::Text(text) => {
                    let text = text
                        .unescape()
                        .map_err(|error| Config(format!("Bad text in manifest: {error}")))?;
                    match open.last().map(String::as_str) {
                        Some("features") => manifest.features |= Features::parse_list(&text)?,
                        _ => {
                            return Err(Config(format!(
                                "Unexpected text '{}' in manifest",
                                text.trim()
                            )))
                        }
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !seen_root {
            return Err(Config("Manifest has no <hostlink> root element".to_string()));
        }
        if let Some(name) = open.last() {
            return Err(Config(format!("Element <{name}> is not closed")));
        }

        log::debug!(
            "Parsed manifest with {} build profiles, features {:?}",
            manifest.profiles.len(),
            manifest.features
        );
        Ok(manifest)
    }

    fn open_element(
        &mut self,
        name: &str,
        element: &BytesStart<'_>,
        parent: Option<&String>,
        build: &mut Option<BuildProfile>,
        seen_root: &mut bool,
    ) -> Result<()> {
        match (parent.map(String::as_str), name) {
            (None, "hostlink") if !*seen_root => {
                attributes(element, &[])?;
                *seen_root = true;
            }
            (Some("hostlink"), "features") => {
                attributes(element, &[])?;
            }
            (Some("hostlink"), "build") => {
                let mut attrs = attributes(element, &["version", "sha1"])?;
                let version = required(&mut attrs, "version", name)?;
                let mut profile = BuildProfile::new(version);
                if let Some(sha1) = attrs.remove("sha1") {
                    profile = profile.with_fingerprint(sha1);
                }
                *build = Some(profile);
            }
            (Some("build"), "symbol") => {
                let Some(profile) = build.as_mut() else {
                    return Err(Config("<symbol> outside of <build>".to_string()));
                };
                let (symbol, location) = parse_symbol(element)?;
                if profile.insert(symbol.clone(), location).is_some() {
                    return Err(Config(format!(
                        "Symbol '{symbol}' listed twice for build {}",
                        profile.version()
                    )));
                }
            }
            (parent, name) => {
                return Err(Config(format!(
                    "Unexpected element <{name}> inside <{}>",
                    parent.unwrap_or("document")
                )))
            }
        }
        Ok(())
    }

    fn close_element(&mut self, name: &str, build: &mut Option<BuildProfile>) {
        if name == "build" {
            if let Some(profile) = build.take() {
                self.profiles.push(profile);
            }
        }
    }

    /// Features enabled by the manifest
    #[must_use]
    pub fn features(&self) -> Features {
        self.features
    }

    /// Every build profile, in document order
    #[must_use]
    pub fn profiles(&self) -> &[BuildProfile] {
        &self.profiles
    }

    /// The profile for the host build with `fingerprint`.
    ///
    /// A profile bound to exactly this fingerprint wins; otherwise the first profile without a
    /// fingerprint is used.
    #[must_use]
    pub fn profile_for(&self, fingerprint: &str) -> Option<&BuildProfile> {
        self.profiles
            .iter()
            .find(|profile| {
                profile
                    .fingerprint()
                    .is_some_and(|own| own.eq_ignore_ascii_case(fingerprint))
            })
            .or_else(|| {
                self.profiles
                    .iter()
                    .find(|profile| profile.fingerprint().is_none())
            })
    }
}

fn element_name(element: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(element.name().as_ref()).into_owned()
}

fn attributes(element: &BytesStart<'_>, allowed: &[&str]) -> Result<HashMap<String, String>> {
    let name = element_name(element);
    let mut values = HashMap::new();

    for attribute in element.attributes() {
        let attribute =
            attribute.map_err(|error| Config(format!("Bad attribute on <{name}>: {error}")))?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        if !allowed.contains(&key.as_str()) {
            return Err(Config(format!("Unknown attribute '{key}' on <{name}>")));
        }

        let value = attribute
            .unescape_value()
            .map_err(|error| Config(format!("Bad value for '{key}' on <{name}>: {error}")))?
            .into_owned();
        values.insert(key, value);
    }

    Ok(values)
}

fn required(values: &mut HashMap<String, String>, key: &str, element: &str) -> Result<String> {
    values
        .remove(key)
        .ok_or_else(|| Config(format!("<{element}> is missing the '{key}' attribute")))
}

fn parse_symbol(element: &BytesStart<'_>) -> Result<(String, SymbolLocation)> {
    let mut attrs = attributes(element, &["name", "offset", "pattern", "adjust"])?;
    let name = required(&mut attrs, "name", "symbol")?;

    let location = match (attrs.remove("offset"), attrs.remove("pattern")) {
        (Some(offset), None) => {
            if attrs.contains_key("adjust") {
                return Err(Config(format!("'adjust' on '{name}' requires a pattern")));
            }
            SymbolLocation::Offset(parse_u64(&offset)?)
        }
        (None, Some(pattern)) => SymbolLocation::Signature {
            pattern: Signature::parse(&pattern)?,
            adjust: attrs.remove("adjust").as_deref().map_or(Ok(0), parse_i64)?,
        },
        _ => {
            return Err(Config(format!(
                "Symbol '{name}' needs exactly one of 'offset' or 'pattern'"
            )))
        }
    };

    Ok((name, location))
}

fn parse_u64(value: &str) -> Result<u64> {
    let value = value.trim();
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };

    parsed.map_err(|_| Config(format!("Invalid number '{value}'")))
}

fn parse_i64(value: &str) -> Result<i64> {
    let trimmed = value.trim();
    let (negative, magnitude) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };

    let magnitude = i64::try_from(parse_u64(magnitude)?)
        .map_err(|_| Config(format!("Number '{trimmed}' out of range")))?;
    Ok(if negative { -magnitude } else { magnitude })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<hostlink>
  <!-- features enabled for this install -->
  <features>multiplayer, Logging</features>
  <build version="1.0.3.279" sha1="3F786850E387550FDAB836ED7E6DC881DE23001B">
    <symbol name="lGetMemoryUsage" offset="0x2f1a0"/>
    <symbol name="SetActiveDLCAndMods" pattern="55 8B EC ?? 6A FF" adjust="-0x10"/>
  </build>
  <build version="any">
    <symbol name="lGetMemoryUsage" offset="4096"></symbol>
  </build>
</hostlink>
"#;

    #[test]
    fn features_parse() {
        assert_eq!(
            Features::parse_list("multiplayer,LUAJIT").unwrap(),
            Features::MULTIPLAYER | Features::LUAJIT
        );
        assert_eq!(Features::parse_list("").unwrap(), Features::empty());
        assert_eq!(" debug ".parse::<Features>().unwrap(), Features::DEBUG);
        assert!(matches!(Features::parse_list("multiplayer,turbo"), Err(Config(_))));
    }

    #[test]
    fn manifest() {
        let manifest = Manifest::from_xml(MANIFEST).unwrap();

        assert_eq!(manifest.features(), Features::MULTIPLAYER | Features::LOGGING);
        assert_eq!(manifest.profiles().len(), 2);

        let profile = manifest
            .profile_for("3f786850e387550fdab836ed7e6dc881de23001b")
            .unwrap();
        assert_eq!(profile.version(), "1.0.3.279");
        assert_eq!(
            profile.location("lGetMemoryUsage"),
            Some(&SymbolLocation::Offset(0x2f1a0))
        );
        match profile.location("SetActiveDLCAndMods") {
            Some(SymbolLocation::Signature { pattern, adjust }) => {
                assert_eq!(pattern.to_string(), "55 8B EC ?? 6A FF");
                assert_eq!(*adjust, -0x10);
            }
            other => panic!("Expected signature, got {other:?}"),
        }

        let fallback = manifest.profile_for("0000").unwrap();
        assert_eq!(fallback.version(), "any");
        assert_eq!(
            fallback.location("lGetMemoryUsage"),
            Some(&SymbolLocation::Offset(4096))
        );
    }

    #[test]
    fn manifest_without_fallback() {
        let manifest = Manifest::from_xml(
            r#"<hostlink><build version="1" sha1="aa"><symbol name="a" offset="1"/></build></hostlink>"#,
        )
        .unwrap();
        assert!(manifest.profile_for("AA").is_some());
        assert!(manifest.profile_for("bb").is_none());
        assert_eq!(manifest.features(), Features::empty());
    }

    #[test]
    fn manifest_invalid() {
        let cases = [
            "",
            "<other/>",
            "<hostlink><features>warp</features></hostlink>",
            "<hostlink><build><symbol name=\"a\" offset=\"1\"/></build></hostlink>",
            "<hostlink><build version=\"1\"><symbol offset=\"1\"/></build></hostlink>",
            "<hostlink><build version=\"1\"><symbol name=\"a\"/></build></hostlink>",
            "<hostlink><build version=\"1\"><symbol name=\"a\" offset=\"1\" pattern=\"90\"/></build></hostlink>",
            "<hostlink><build version=\"1\"><symbol name=\"a\" offset=\"zz\"/></build></hostlink>",
            "<hostlink><build version=\"1\"><symbol name=\"a\" offset=\"1\" adjust=\"2\"/></build></hostlink>",
            "<hostlink><build version=\"1\"><symbol name=\"a\" pattern=\"?? ??\"/></build></hostlink>",
            "<hostlink><build version=\"1\"><symbol name=\"a\" offset=\"1\"/><symbol name=\"a\" offset=\"2\"/></build></hostlink>",
            "<hostlink><build version=\"1\" color=\"red\"/></hostlink>",
            "<hostlink><symbol name=\"a\" offset=\"1\"/></hostlink>",
            "<hostlink>stray</hostlink>",
            "<hostlink><build version=\"1\"></hostlink>",
            "<hostlink>",
        ];

        for case in cases {
            match Manifest::from_xml(case) {
                Err(Config(_)) => {}
                other => panic!("Expected Config error for {case:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn numbers() {
        assert_eq!(parse_u64("0x10").unwrap(), 16);
        assert_eq!(parse_u64("0X1f").unwrap(), 31);
        assert_eq!(parse_u64("42").unwrap(), 42);
        assert_eq!(parse_i64("-0x10").unwrap(), -16);
        assert_eq!(parse_i64("+8").unwrap(), 8);
        assert!(parse_i64("0xFFFFFFFFFFFFFFFF").is_err());
        assert!(parse_u64("-1").is_err());
    }

    #[test]
    fn from_file() {
        let path = std::env::temp_dir().join("hostlink_manifest_test.xml");
        std::fs::write(&path, MANIFEST).unwrap();

        let manifest = Manifest::from_file(&path).unwrap();
        assert_eq!(manifest.profiles().len(), 2);

        std::fs::remove_file(&path).unwrap();
        assert!(matches!(
            Manifest::from_file(&path),
            Err(Error::FileError(_))
        ));
    }
}
