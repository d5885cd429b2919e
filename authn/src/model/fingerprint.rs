// III-IV
// Copyright 2023 Julio Merino
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not
// use this file except in compliance with the License.  You may obtain a copy
// of the License at:
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.  See the
// License for the specific language governing permissions and limitations
// under the License.

//! Device fingerprints derived from `User-Agent` strings.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Platforms recognized in user agents, in order of precedence.
const PLATFORMS: &[&str] = &["iPhone", "iPad", "Android", "Windows", "Macintosh", "X11", "Linux"];

/// Compiles a hardcoded regular expression.
fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("Hardcoded regexes must be valid")
}

/// Operating system patterns and their display names, in order of precedence.
static OS_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (re(r"Windows NT ([\d.]+)"), "Windows"),
        (re(r"CPU (?:iPhone )?OS ([\d_]+)"), "iOS"),
        (re(r"Mac OS X ([\d_.]+)"), "Mac OS X"),
        (re(r"Android ([\d.]+)"), "Android"),
        (re(r"(Linux)"), "Linux"),
    ]
});

/// Rendering engine patterns and their names, in order of precedence.
static ENGINE_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (re(r"AppleWebKit/([\d.]+)"), "AppleWebKit"),
        (re(r"Trident/([\d.]+)"), "Trident"),
        (re(r"Presto/([\d.]+)"), "Presto"),
        (re(r"rv:([\d.]+)\) Gecko/"), "Gecko"),
    ]
});

/// Browser patterns and their names, in order of precedence.
static BROWSER_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (re(r"Edg(?:e|A|iOS)?/([\d.]+)"), "Edge"),
        (re(r"OPR/([\d.]+)"), "Opera"),
        (re(r"Firefox/([\d.]+)"), "Firefox"),
        (re(r"CriOS/([\d.]+)"), "Chrome"),
        (re(r"Chrome/([\d.]+)"), "Chrome"),
        (re(r"Version/([\d.]+).*Safari/"), "Safari"),
        (re(r"MSIE ([\d.]+)"), "Internet Explorer"),
    ]
});

/// Pattern for generic `product/version` agents such as command line tools.
static PRODUCT_PATTERN: LazyLock<Regex> = LazyLock::new(|| re(r"^([^/\s]+)(?:/(\S+))?"));

/// Finds the first pattern in `patterns` that matches `ua` and returns its name and version.
fn find(patterns: &[(Regex, &'static str)], ua: &str) -> (String, String) {
    for (pattern, name) in patterns {
        if let Some(captures) = pattern.captures(ua) {
            let version = captures.get(1).map(|m| m.as_str().replace('_', ".")).unwrap_or_default();
            return ((*name).to_owned(), version);
        }
    }
    (String::new(), String::new())
}

/// Identifies the device a session was opened from.
///
/// Two requests come from the same device if their fingerprints are equal.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct Fingerprint {
    /// Hardware or windowing platform, like `Macintosh` or `iPhone`.
    pub platform: String,

    /// Operating system and version, like `Windows 10.0`.
    pub os: String,

    /// Name of the rendering engine.
    pub engine_name: String,

    /// Version of the rendering engine.
    pub engine_version: String,

    /// Name of the browser or client program.
    pub browser_name: String,

    /// Version of the browser or client program.
    pub browser_version: String,
}

impl Fingerprint {
    /// Derives the fingerprint of the device that sent the `ua` user agent.
    ///
    /// Agents that do not look like browsers are identified by their leading product token.
    pub fn parse(ua: &str) -> Self {
        let ua = ua.trim();
        let platform = PLATFORMS.iter().find(|p| ua.contains(*p)).copied().unwrap_or_default();
        let os = match find(&OS_PATTERNS, ua) {
            (name, _) if name == "Linux" => name,
            (name, version) if !name.is_empty() => format!("{} {}", name, version),
            _ => String::new(),
        };
        let (engine_name, engine_version) = find(&ENGINE_PATTERNS, ua);
        let (mut browser_name, mut browser_version) = find(&BROWSER_PATTERNS, ua);
        if browser_name.is_empty() {
            if let Some(captures) = PRODUCT_PATTERN.captures(ua) {
                browser_name = captures.get(1).map(|m| m.as_str().to_owned()).unwrap_or_default();
                browser_version =
                    captures.get(2).map(|m| m.as_str().to_owned()).unwrap_or_default();
            }
        }
        Self {
            platform: platform.to_owned(),
            os,
            engine_name,
            engine_version,
            browser_name,
            browser_version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_desktop_chrome() {
        let fp = Fingerprint::parse(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
             Chrome/120.0.0.0 Safari/537.36",
        );
        assert_eq!(
            Fingerprint {
                platform: "Windows".to_owned(),
                os: "Windows 10.0".to_owned(),
                engine_name: "AppleWebKit".to_owned(),
                engine_version: "537.36".to_owned(),
                browser_name: "Chrome".to_owned(),
                browser_version: "120.0.0.0".to_owned(),
            },
            fp
        );
    }

    #[test]
    fn test_parse_firefox_and_safari() {
        let fp = Fingerprint::parse(
            "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0",
        );
        assert_eq!("X11", fp.platform);
        assert_eq!("Linux", fp.os);
        assert_eq!(("Gecko", "121.0"), (fp.engine_name.as_str(), fp.engine_version.as_str()));
        assert_eq!(("Firefox", "121.0"), (fp.browser_name.as_str(), fp.browser_version.as_str()));

        let fp = Fingerprint::parse(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_1 like Mac OS X) AppleWebKit/605.1.15 \
             (KHTML, like Gecko) Version/17.1 Mobile/15E148 Safari/604.1",
        );
        assert_eq!("iPhone", fp.platform);
        assert_eq!("iOS 17.1", fp.os);
        assert_eq!(("Safari", "17.1"), (fp.browser_name.as_str(), fp.browser_version.as_str()));
    }

    #[test]
    fn test_parse_generic_products() {
        let fp = Fingerprint::parse("curl/8.4.0");
        assert_eq!(("curl", "8.4.0"), (fp.browser_name.as_str(), fp.browser_version.as_str()));
        assert_eq!("", fp.platform);

        assert_ne!(Fingerprint::parse("A"), Fingerprint::parse("B"));
        assert_eq!(Fingerprint::default(), Fingerprint::parse(""));
    }
}
