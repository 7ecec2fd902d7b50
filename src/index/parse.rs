// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::location::AssetLocation;

/// Anchor with an optional leading icon, as emitted by Apache's mod_autoindex
static ANCHOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<a\s+href="([^"]+)"[^>]*>(?:<img[^>]*>)?([^<]+)</a>"#)
        .expect("anchor pattern is valid")
});

/// Link texts of index columns and navigation rather than files
const INDEX_FURNITURE: [&str; 4] = ["Parent Directory", "Name", "Last Modified", "Size"];

/// Parse an HTML directory index into the locations of the files it lists
///
/// Column headers, the parent link, subdirectories and sort links are
/// skipped. When `allowed_extensions` is non-empty (entries with a leading
/// dot, e.g. `.png`), only files with one of those extensions are kept.
///
/// Entries come back in document order. Duplicates are not removed, and a
/// document without anchors yields an empty list.
pub fn parse_index(
    base_url: &Url,
    html: &str,
    allowed_extensions: Option<&[String]>,
) -> Vec<AssetLocation> {
    let allowed_extensions = allowed_extensions.filter(|exts| !exts.is_empty());

    ANCHOR
        .captures_iter(html)
        .filter_map(|captures| {
            let href = html_escape::decode_html_entities(captures.get(1)?.as_str());
            let link_text = html_escape::decode_html_entities(captures.get(2)?.as_str());
            parse_entry(base_url, &href, link_text.trim(), allowed_extensions)
        })
        .collect()
}

fn parse_entry(
    base_url: &Url,
    href: &str,
    link_text: &str,
    allowed_extensions: Option<&[String]>,
) -> Option<AssetLocation> {
    if is_index_furniture(link_text) || href.ends_with('/') || href.contains('?') {
        return None;
    }

    let raw_name = href.rsplit('/').next().unwrap_or(href);
    // Apache escapes hrefs itself; decode first so the name is not escaped twice
    let file_name = urlencoding::decode(raw_name)
        .map(|name| name.into_owned())
        .unwrap_or_else(|_| raw_name.to_string());

    if file_name.is_empty() {
        return None;
    }

    if let Some(extensions) = allowed_extensions
        && !has_allowed_extension(&file_name, extensions)
    {
        return None;
    }

    base_url
        .join(&urlencoding::encode(&file_name))
        .ok()
        .map(AssetLocation::new)
}

fn is_index_furniture(link_text: &str) -> bool {
    INDEX_FURNITURE
        .iter()
        .any(|furniture| furniture.eq_ignore_ascii_case(link_text))
}

fn has_allowed_extension(file_name: &str, extensions: &[String]) -> bool {
    let Some((stem, ext)) = file_name.rsplit_once('.') else {
        return false;
    };
    if stem.is_empty() || ext.is_empty() {
        return false;
    }

    extensions
        .iter()
        .any(|allowed| allowed.strip_prefix('.').unwrap_or(allowed).eq_ignore_ascii_case(ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    const APACHE_INDEX: &str = r#"<!DOCTYPE HTML PUBLIC "-//W3C//DTD HTML 3.2 Final//EN">
<html>
 <head>
  <title>Index of /skins</title>
 </head>
 <body>
<h1>Index of /skins</h1>
  <table>
   <tr><th valign="top"><img src="/icons/blank.gif" alt="[ICO]"></th><th><a href="?C=N;O=D">Name</a></th><th><a href="?C=M;O=A">Last modified</a></th><th><a href="?C=S;O=A">Size</a></th></tr>
   <tr><th colspan="4"><hr></th></tr>
<tr><td valign="top"><img src="/icons/back.gif" alt="[PARENTDIR]"></td><td><a href="/">Parent Directory</a></td><td>&nbsp;</td><td align="right">  - </td></tr>
<tr><td valign="top"><img src="/icons/folder.gif" alt="[DIR]"></td><td><a href="old/">old/</a></td><td align="right">2024-01-15 10:00  </td><td align="right">  - </td></tr>
<tr><td valign="top"><img src="/icons/image2.gif" alt="[IMG]"></td><td><a href="a.png">a.png</a></td><td align="right">2024-01-15 10:00  </td><td align="right">1.2K</td></tr>
<tr><td valign="top"><img src="/icons/text.gif" alt="[TXT]"></td><td><a href="b.txt">b.txt</a></td><td align="right">2024-01-15 10:00  </td><td align="right">120 </td></tr>
   <tr><th colspan="4"><hr></th></tr>
</table>
</body></html>"#;

    fn base() -> Url {
        Url::parse("https://cdn.example.com/skins/").unwrap()
    }

    fn names(locations: &[AssetLocation]) -> Vec<String> {
        locations.iter().map(|l| l.as_str().to_string()).collect()
    }

    #[test]
    fn filters_furniture_directories_and_extensions() {
        let extensions = vec![".png".to_string()];
        let locations = parse_index(&base(), APACHE_INDEX, Some(extensions.as_slice()));

        assert_eq!(names(&locations), vec!["https://cdn.example.com/skins/a.png"]);
    }

    #[test]
    fn keeps_every_file_without_extension_filter() {
        let locations = parse_index(&base(), APACHE_INDEX, None);

        assert_eq!(
            names(&locations),
            vec![
                "https://cdn.example.com/skins/a.png",
                "https://cdn.example.com/skins/b.txt",
            ]
        );
    }

    #[test]
    fn empty_extension_list_disables_filter() {
        let locations = parse_index(&base(), APACHE_INDEX, Some(Vec::new().as_slice()));
        assert_eq!(locations.len(), 2);
    }

    #[test]
    fn furniture_matching_ignores_case_and_whitespace() {
        let html = r#"<a href="x.png">  PARENT DIRECTORY </a><A HREF="y.png">size</A><a href="z.png">z.png</a>"#;
        let locations = parse_index(&base(), html, None);

        assert_eq!(names(&locations), vec!["https://cdn.example.com/skins/z.png"]);
    }

    #[test]
    fn extension_filter_rejects_missing_extension() {
        let html = r#"<a href="README">README</a><a href="photo.JPG">photo.JPG</a>"#;
        let extensions = vec![".jpg".to_string(), ".png".to_string()];
        let locations = parse_index(&base(), html, Some(extensions.as_slice()));

        assert_eq!(
            names(&locations),
            vec!["https://cdn.example.com/skins/photo.JPG"]
        );
    }

    #[test]
    fn file_names_are_escaped_once() {
        let html = r#"<a href="red%20car.png">red car.png</a><a href="blue car.png">blue car.png</a><a href="a&amp;b.png">a&amp;b.png</a>"#;
        let locations = parse_index(&base(), html, None);

        assert_eq!(
            names(&locations),
            vec![
                "https://cdn.example.com/skins/red%20car.png",
                "https://cdn.example.com/skins/blue%20car.png",
                "https://cdn.example.com/skins/a%26b.png",
            ]
        );
        assert_eq!(locations[2].file_name(), "a&b.png");
    }

    #[test]
    fn uses_last_segment_of_absolute_hrefs() {
        let html = r#"<a href="/elsewhere/deep/c.png">c.png</a>"#;
        let locations = parse_index(&base(), html, None);

        assert_eq!(names(&locations), vec!["https://cdn.example.com/skins/c.png"]);
    }

    #[test]
    fn duplicates_are_passed_through() {
        let html = r#"<a href="a.png">a.png</a><a href="a.png">a.png</a>"#;
        let locations = parse_index(&base(), html, None);

        assert_eq!(locations.len(), 2);
        assert_eq!(locations[0], locations[1]);
    }

    #[test]
    fn malformed_html_yields_empty_list() {
        assert!(parse_index(&base(), "<html><body>nothing here", None).is_empty());
        assert!(parse_index(&base(), "", None).is_empty());
    }
}
