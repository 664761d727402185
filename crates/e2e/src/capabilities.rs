//! VOSI capabilities document of a TAP service
//!
//! The expected document is rendered from the deployment base URL, the
//! application and its inclusion flags. Both documents are normalized before
//! comparison so that formatting differences do not count.

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use rspval_common::{CapabilityIncludes, TapApplication};

use crate::error::{E2eError, E2eResult};

const ADQL_GEOMETRY: &[&str] = &["POINT", "CIRCLE", "POLYGON", "CONTAINS"];

const ADQL_EXTRA_GEOMETRY: &[&str] = &[
    "INTERSECTS",
    "AREA",
    "BOX",
    "CENTROID",
    "COORD1",
    "COORD2",
    "DISTANCE",
];

fn simple_capability(out: &mut String, standard_id: &str, access_url: &str, use_: &str, version: Option<&str>) {
    let version = version
        .map(|v| format!(" version=\"{}\"", v))
        .unwrap_or_default();
    out.push_str(&format!(
        r#"  <capability standardID="{standard_id}">
    <interface xsi:type="vs:ParamHTTP" role="std"{version}>
      <accessURL use="{use_}">{access_url}</accessURL>
    </interface>
  </capability>
"#
    ));
}

/// Render the capabilities document a service is expected to publish
pub fn render_capabilities(base_url: &str, app: TapApplication, includes: CapabilityIncludes) -> String {
    let service = format!("{}/api/{}", base_url.trim_end_matches('/'), app);
    let mut out = String::new();

    out.push_str(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<vosi:capabilities xmlns:vosi="http://www.ivoa.net/xml/VOSICapabilities/v1.0" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns:vs="http://www.ivoa.net/xml/VODataService/v1.1" xmlns:tr="http://www.ivoa.net/xml/TAPRegExt/v1.0">
"#,
    );

    simple_capability(
        &mut out,
        "ivo://ivoa.net/std/VOSI#capabilities",
        &format!("{}/capabilities", service),
        "full",
        None,
    );
    simple_capability(
        &mut out,
        "ivo://ivoa.net/std/VOSI#availability",
        &format!("{}/availability", service),
        "full",
        None,
    );
    simple_capability(
        &mut out,
        "ivo://ivoa.net/std/VOSI#tables-1.1",
        &format!("{}/tables", service),
        "base",
        Some("1.1"),
    );

    out.push_str(&format!(
        r#"  <capability standardID="ivo://ivoa.net/std/TAP" xsi:type="tr:TableAccess">
    <interface xsi:type="vs:ParamHTTP" role="std" version="1.1">
      <accessURL use="base">{service}</accessURL>
      <securityMethod standardID="ivo://ivoa.net/sso#token"/>
    </interface>
"#
    ));

    if includes.include_datamodel {
        out.push_str(
            "    <dataModel ivo-id=\"ivo://ivoa.net/std/ObsCore#core-1.1\">ObsCore-1.1</dataModel>\n",
        );
    }

    out.push_str(
        r#"    <language>
      <name>ADQL</name>
      <version ivo-id="ivo://ivoa.net/std/ADQL#v2.0">2.0</version>
      <description>ADQL-2.0</description>
      <languageFeatures type="ivo://ivoa.net/std/TAPRegExt#features-adqlgeo">
"#,
    );

    let extra: &[&str] = if includes.include_geometry {
        ADQL_EXTRA_GEOMETRY
    } else {
        &[]
    };
    for form in ADQL_GEOMETRY.iter().chain(extra) {
        out.push_str(&format!("        <feature>\n          <form>{}</form>\n        </feature>\n", form));
    }

    out.push_str(
        r#"      </languageFeatures>
    </language>
    <outputFormat ivo-id="ivo://ivoa.net/std/TAPRegExt#output-votable-td">
      <mime>application/x-votable+xml</mime>
      <alias>votable</alias>
    </outputFormat>
    <outputFormat>
      <mime>text/xml</mime>
    </outputFormat>
    <outputFormat>
      <mime>text/csv</mime>
      <alias>csv</alias>
    </outputFormat>
"#,
    );

    if includes.include_upload {
        out.push_str(
            r#"    <uploadMethod ivo-id="ivo://ivoa.net/std/TAPRegExt#upload-inline"/>
    <uploadMethod ivo-id="ivo://ivoa.net/std/TAPRegExt#upload-http"/>
    <uploadMethod ivo-id="ivo://ivoa.net/std/TAPRegExt#upload-https"/>
"#,
        );
    }

    out.push_str(
        r#"    <retentionPeriod>
      <default>604800</default>
    </retentionPeriod>
    <outputLimit>
      <default unit="row">100000</default>
    </outputLimit>
"#,
    );

    if includes.include_upload {
        out.push_str(
            r#"    <uploadLimit>
      <hard unit="byte">32000000</hard>
    </uploadLimit>
"#,
        );
    }

    out.push_str("  </capability>\n</vosi:capabilities>\n");
    out
}

/// Parse an XML document and re-emit it with trimmed text and two-space
/// indentation. The declaration, comments, processing instructions and the
/// doctype are dropped; `<a></a>` and `<a/>` normalize to the same output.
pub fn normalize_xml(xml: &[u8]) -> E2eResult<String> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    let mut pending: Option<BytesStart<'static>> = None;
    let mut saw_root = false;

    loop {
        let event = reader.read_event()?;

        if let Some(start) = pending.take() {
            if matches!(event, Event::End(_)) {
                writer
                    .write_event(Event::Empty(start))
                    .map_err(quick_xml::Error::from)?;
                continue;
            }
            writer
                .write_event(Event::Start(start))
                .map_err(quick_xml::Error::from)?;
        }

        match event {
            Event::Start(e) => {
                saw_root = true;
                pending = Some(e.into_owned());
            }
            Event::Empty(e) => {
                saw_root = true;
                writer
                    .write_event(Event::Empty(e))
                    .map_err(quick_xml::Error::from)?;
            }
            Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_) => {}
            Event::Eof => break,
            other => writer.write_event(other).map_err(quick_xml::Error::from)?,
        }
    }

    if !saw_root {
        return Err(E2eError::AssertionFailed("Document has no root element".to_string()));
    }

    String::from_utf8(writer.into_inner())
        .map_err(|e| E2eError::InvalidArgument(format!("Normalized XML is not UTF-8: {}", e)))
}

/// First line on which two normalized documents differ, 1-based
fn first_difference<'a>(expected: &'a str, actual: &'a str) -> Option<(usize, &'a str, &'a str)> {
    let mut expected_lines = expected.lines();
    let mut actual_lines = actual.lines();
    let mut line = 0;

    loop {
        line += 1;
        match (expected_lines.next(), actual_lines.next()) {
            (None, None) => return None,
            (e, a) if e == a => continue,
            (e, a) => return Some((line, e.unwrap_or("<end of document>"), a.unwrap_or("<end of document>"))),
        }
    }
}

/// Compare a service's capabilities document with the rendered one
pub fn validate_capabilities(
    base_url: &str,
    app: TapApplication,
    includes: CapabilityIncludes,
    actual: &[u8],
) -> E2eResult<()> {
    let expected = normalize_xml(render_capabilities(base_url, app, includes).as_bytes())?;
    let actual = normalize_xml(actual)?;

    match first_difference(&expected, &actual) {
        None => Ok(()),
        Some((line, want, got)) => Err(E2eError::AssertionFailed(format!(
            "The actual XML does not match the expected XML for {} (line {}: expected `{}`, got `{}`)",
            app,
            line,
            want.trim(),
            got.trim()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://data.example.org";

    fn includes(datamodel: bool, geometry: bool, upload: bool) -> CapabilityIncludes {
        CapabilityIncludes {
            include_datamodel: datamodel,
            include_geometry: geometry,
            include_upload: upload,
        }
    }

    #[test]
    fn test_rendered_document_matches_itself() {
        let inc = includes(true, true, true);
        let doc = render_capabilities(BASE, TapApplication::Tap, inc);
        validate_capabilities(BASE, TapApplication::Tap, inc, doc.as_bytes()).unwrap();
    }

    #[test]
    fn test_formatting_is_ignored() {
        let a = br#"<?xml version="1.0"?><!-- c --><root a="1"><x>  text </x><y></y></root>"#;
        let b = b"<root a=\"1\">\n\n   <x>text</x>\n   <y/>\n</root>\n";
        assert_eq!(normalize_xml(a).unwrap(), normalize_xml(b).unwrap());
    }

    #[test]
    fn test_flags_change_document() {
        let plain = render_capabilities(BASE, TapApplication::SsoTap, includes(false, false, false));
        let full = render_capabilities(BASE, TapApplication::SsoTap, includes(true, true, true));

        assert!(!plain.contains("ObsCore-1.1"));
        assert!(!plain.contains("upload-inline"));
        assert!(!plain.contains("<form>INTERSECTS</form>"));
        assert!(full.contains("ObsCore-1.1"));
        assert!(full.contains("upload-inline"));
        assert!(full.contains("<form>INTERSECTS</form>"));
        assert!(plain.contains("https://data.example.org/api/ssotap/tables"));
    }

    #[test]
    fn test_mismatch_names_first_differing_line() {
        let doc = render_capabilities(BASE, TapApplication::Tap, includes(false, false, false));
        let err = validate_capabilities(BASE, TapApplication::Tap, includes(true, false, false), doc.as_bytes())
            .unwrap_err();

        let message = err.to_string();
        assert!(err.is_assertion());
        assert!(message.contains("The actual XML does not match the expected XML for tap"));
        assert!(message.contains("ObsCore-1.1"), "{}", message);
    }

    #[test]
    fn test_other_host_fails() {
        let doc = render_capabilities("https://other.example.org", TapApplication::Tap, includes(false, false, false));
        assert!(validate_capabilities(BASE, TapApplication::Tap, includes(false, false, false), doc.as_bytes()).is_err());
    }

    #[test]
    fn test_malformed_xml_is_an_error() {
        assert!(normalize_xml(b"<root><a></root>").is_err());
        assert!(normalize_xml(b"").is_err());
    }
}
