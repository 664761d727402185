//! Minimal readers for the IVOA documents the validator inspects
//!
//! Only what the checks need is extracted: the `QUERY_STATUS` and row count
//! of a VOTable, the fields of a UWS job, and the table names of a VOSI
//! tableset.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{E2eError, E2eResult};
use crate::tap::{JobInfo, JobPhase, TapResultSet};

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attribute(e: &BytesStart<'_>, name: &str) -> E2eResult<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.local_name().as_ref() == name.as_bytes() {
            let value = attr.unescape_value().map_err(quick_xml::Error::from)?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

/// Read the status and row count from a VOTable query response.
///
/// The first `QUERY_STATUS` info element wins. Rows are counted in the
/// first table of the `type="results"` resource, or in the first table of
/// the document when no resource is marked as results. Rows are counted from
/// `TABLEDATA`; binary serializations are rejected since rows cannot be
/// counted without decoding the stream.
pub fn parse_votable(xml: &[u8]) -> E2eResult<TapResultSet> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut status: Option<String> = None;
    let mut saw_votable = false;

    // One entry per open RESOURCE: whether it is a results resource
    let mut resources: Vec<bool> = Vec::new();
    let mut table_rows: Vec<usize> = Vec::new();
    let mut current_table: Option<usize> = None;
    let mut results_table: Option<usize> = None;

    loop {
        let (e, opens) = match reader.read_event()? {
            Event::Start(e) => (e, true),
            Event::Empty(e) => (e, false),
            Event::End(e) => {
                match e.local_name().as_ref() {
                    b"RESOURCE" => {
                        resources.pop();
                    }
                    b"TABLE" => current_table = None,
                    _ => {}
                }
                continue;
            }
            Event::Eof => break,
            _ => continue,
        };

        match local_name(&e).as_str() {
            "VOTABLE" => saw_votable = true,
            "RESOURCE" if opens => {
                resources.push(attribute(&e, "type")?.as_deref() == Some("results"));
            }
            "TABLE" => {
                table_rows.push(0);
                let index = table_rows.len() - 1;
                if results_table.is_none() && resources.iter().any(|&r| r) {
                    results_table = Some(index);
                }
                if opens {
                    current_table = Some(index);
                }
            }
            "INFO" if status.is_none() => {
                if attribute(&e, "name")?.as_deref() == Some("QUERY_STATUS") {
                    status = attribute(&e, "value")?;
                }
            }
            "TR" => {
                if let Some(rows) = current_table.and_then(|i| table_rows.get_mut(i)) {
                    *rows += 1;
                }
            }
            "BINARY" | "BINARY2" | "FITS" => {
                return Err(E2eError::Tap(
                    "binary VOTable serialization cannot be row counted".to_string(),
                ));
            }
            _ => {}
        }
    }

    if !saw_votable {
        return Err(E2eError::Tap("response is not a VOTable document".to_string()));
    }

    let row_count = table_rows.get(results_table.unwrap_or(0)).copied().unwrap_or(0);

    Ok(TapResultSet {
        status: status.unwrap_or_default(),
        row_count,
    })
}

/// Read a UWS job description
pub fn parse_job(xml: &[u8]) -> E2eResult<JobInfo> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut info = JobInfo::default();
    let mut current: Option<String> = None;
    let mut parameter: Option<String> = None;
    let mut saw_job = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = local_name(&e);
                match name.as_str() {
                    "job" => saw_job = true,
                    "parameter" => parameter = attribute(&e, "id")?,
                    "result" => {
                        if let Some(href) = attribute(&e, "href")? {
                            info.result_hrefs.push(href);
                        }
                    }
                    _ => {}
                }
                current = Some(name);
            }
            Event::Empty(e) => {
                if local_name(&e) == "result" {
                    if let Some(href) = attribute(&e, "href")? {
                        info.result_hrefs.push(href);
                    }
                }
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(quick_xml::Error::from)?.into_owned();
                if text.is_empty() {
                    continue;
                }
                match current.as_deref() {
                    Some("jobId") => info.job_id = Some(text),
                    Some("ownerId") => info.owner = Some(text),
                    Some("phase") => info.phase = JobPhase::parse(&text),
                    Some("quote") => info.quote = Some(text),
                    Some("executionDuration") => info.execution_duration = text.parse().ok(),
                    Some("destruction") => info.destruction = Some(text),
                    Some("parameter") => {
                        if parameter
                            .as_deref()
                            .map(|id| id.eq_ignore_ascii_case("query"))
                            .unwrap_or(false)
                        {
                            info.query = Some(text);
                        }
                    }
                    _ => {}
                }
            }
            Event::End(_) => {
                current = None;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_job {
        return Err(E2eError::Tap("response is not a UWS job document".to_string()));
    }

    Ok(info)
}

/// Collect the fully qualified table names of a VOSI tableset
pub fn parse_tableset(xml: &[u8]) -> E2eResult<Vec<String>> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<String> = Vec::new();
    let mut tables = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => stack.push(local_name(&e)),
            Event::End(_) => {
                stack.pop();
            }
            Event::Text(t) => {
                let in_table_name = stack.len() >= 2
                    && stack[stack.len() - 1] == "name"
                    && stack[stack.len() - 2] == "table";
                if in_table_name {
                    tables.push(t.unescape().map_err(quick_xml::Error::from)?.into_owned());
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VOTABLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<VOTABLE xmlns="http://www.ivoa.net/xml/VOTable/v1.3" version="1.3">
  <RESOURCE type="results">
    <INFO name="QUERY_STATUS" value="OK"/>
    <TABLE>
      <FIELD name="id" datatype="long"/>
      <DATA>
        <TABLEDATA>
          <TR><TD>1</TD></TR>
          <TR><TD>2</TD></TR>
          <TR><TD>3</TD></TR>
        </TABLEDATA>
      </DATA>
    </TABLE>
    <INFO name="QUERY_STATUS" value="OVERFLOW"/>
  </RESOURCE>
</VOTABLE>"#;

    #[test]
    fn test_votable_rows_and_status() {
        let result = parse_votable(VOTABLE.as_bytes()).unwrap();
        assert_eq!(result.status, "OK");
        assert_eq!(result.row_count, 3);
    }

    #[test]
    fn test_votable_counts_only_results_table() {
        let xml = r#"<VOTABLE>
  <RESOURCE type="meta">
    <TABLE><DATA><TABLEDATA><TR><TD>x</TD></TR></TABLEDATA></DATA></TABLE>
  </RESOURCE>
  <RESOURCE type="results">
    <INFO name="QUERY_STATUS" value="OK"/>
    <TABLE><DATA><TABLEDATA><TR><TD>1</TD></TR><TR><TD>2</TD></TR></TABLEDATA></DATA></TABLE>
    <TABLE><DATA><TABLEDATA><TR><TD>3</TD></TR></TABLEDATA></DATA></TABLE>
  </RESOURCE>
</VOTABLE>"#;
        let result = parse_votable(xml.as_bytes()).unwrap();
        assert_eq!(result.status, "OK");
        assert_eq!(result.row_count, 2);
    }

    #[test]
    fn test_votable_without_results_resource_uses_first_table() {
        let xml = r#"<VOTABLE><RESOURCE>
            <TABLE><DATA><TABLEDATA><TR><TD>1</TD></TR></TABLEDATA></DATA></TABLE>
            <TABLE><DATA><TABLEDATA><TR><TD>2</TD></TR><TR><TD>3</TD></TR></TABLEDATA></DATA></TABLE>
        </RESOURCE></VOTABLE>"#;
        assert_eq!(parse_votable(xml.as_bytes()).unwrap().row_count, 1);
    }

    #[test]
    fn test_votable_error_status() {
        let xml = r#"<VOTABLE><RESOURCE type="results">
            <INFO name="QUERY_STATUS" value="ERROR">syntax error</INFO>
        </RESOURCE></VOTABLE>"#;
        let result = parse_votable(xml.as_bytes()).unwrap();
        assert_eq!(result.status, "ERROR");
        assert_eq!(result.row_count, 0);
    }

    #[test]
    fn test_votable_binary_rejected() {
        let xml = r#"<VOTABLE><RESOURCE><TABLE><DATA><BINARY2><STREAM encoding="base64">AAAA</STREAM></BINARY2></DATA></TABLE></RESOURCE></VOTABLE>"#;
        assert!(matches!(parse_votable(xml.as_bytes()), Err(E2eError::Tap(_))));
    }

    #[test]
    fn test_not_a_votable() {
        assert!(parse_votable(b"<html><body>502</body></html>").is_err());
    }

    #[test]
    fn test_parse_job() {
        let xml = r#"<?xml version="1.0"?>
<uws:job xmlns:uws="http://www.ivoa.net/xml/UWS/v1.0" xmlns:xlink="http://www.w3.org/1999/xlink">
  <uws:jobId>abc123</uws:jobId>
  <uws:runId/>
  <uws:ownerId>someuser</uws:ownerId>
  <uws:phase>COMPLETED</uws:phase>
  <uws:quote>2024-01-01T00:10:00.000Z</uws:quote>
  <uws:executionDuration>600</uws:executionDuration>
  <uws:destruction>2024-01-08T00:00:00.000Z</uws:destruction>
  <uws:parameters>
    <uws:parameter id="LANG">ADQL</uws:parameter>
    <uws:parameter id="QUERY">SELECT TOP 1 * FROM TAP_SCHEMA.tables</uws:parameter>
  </uws:parameters>
  <uws:results>
    <uws:result id="result" xlink:href="https://rsp.example.org/api/tap/results/abc123/result.xml"/>
  </uws:results>
</uws:job>"#;

        let job = parse_job(xml.as_bytes()).unwrap();
        assert_eq!(job.job_id.as_deref(), Some("abc123"));
        assert_eq!(job.owner.as_deref(), Some("someuser"));
        assert_eq!(job.phase, JobPhase::Completed);
        assert_eq!(job.execution_duration, Some(600));
        assert_eq!(job.query.as_deref(), Some("SELECT TOP 1 * FROM TAP_SCHEMA.tables"));
        assert_eq!(
            job.result_hrefs,
            vec!["https://rsp.example.org/api/tap/results/abc123/result.xml".to_string()]
        );
    }

    #[test]
    fn test_parse_tableset() {
        let xml = r#"<vosi:tableset xmlns:vosi="http://www.ivoa.net/xml/VOSITables/v1.0">
  <schema>
    <name>TAP_SCHEMA</name>
    <table><name>TAP_SCHEMA.tables</name><column><name>table_name</name></column></table>
    <table><name>TAP_SCHEMA.columns</name></table>
  </schema>
</vosi:tableset>"#;

        let tables = parse_tableset(xml.as_bytes()).unwrap();
        assert_eq!(tables, vec!["TAP_SCHEMA.tables", "TAP_SCHEMA.columns"]);
    }
}
