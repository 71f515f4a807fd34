use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

/// A value in a query-result tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    Multi(QueryResult),
    Binary(Vec<u8>),
}

/// A named tree of properties, the unit of everything the simulator
/// reports: command query results and notification bodies alike.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    name: String,
    attrs: Vec<(String, String)>,
    properties: Vec<(String, Value)>,
}

impl QueryResult {
    pub fn new(name: impl Into<String>) -> Self {
        QueryResult { name: name.into(), attrs: Vec::new(), properties: Vec::new() }
    }

    pub fn with_id(name: impl Into<String>, id: impl Into<String>) -> Self {
        let mut qr = QueryResult::new(name);
        let id = id.into();
        if !id.is_empty() {
            qr.attrs.push(("id".to_string(), id));
        }
        qr
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> Option<&str> {
        self.attrs.iter().find(|(k, _)| k == "id").map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attrs.push((key.into(), value.into()));
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.push((key.into(), Value::Str(value.into())));
    }

    pub fn insert_multi(&mut self, value: QueryResult) {
        self.properties.push((String::new(), Value::Multi(value)));
    }

    pub fn insert_binary(&mut self, key: impl Into<String>, value: Vec<u8>) {
        self.properties.push((key.into(), Value::Binary(value)));
    }

    pub fn properties(&self) -> &[(String, Value)] {
        &self.properties
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

/// Formats query results as XML elements inside a `<simulation>` document.
#[derive(Debug, Default)]
pub struct XmlFormatter {
    stylesheet: Option<String>,
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

impl XmlFormatter {
    pub fn set_stylesheet(&mut self, name: impl Into<String>) {
        self.stylesheet = Some(name.into());
    }

    pub fn start(&self) -> String {
        match &self.stylesheet {
            Some(name) => format!(
                "<?xml-stylesheet type=\"text/xsl\" href=\"{}\"?>\n<simulation>\n",
                escape(name)
            ),
            None => "<simulation>\n".to_string(),
        }
    }

    pub fn finish(&self) -> String {
        "</simulation>\n".to_string()
    }

    pub fn format(&self, qr: &QueryResult) -> String {
        let mut out = String::new();
        self.format_multi(qr, 1, &mut out);
        out
    }

    fn format_multi(&self, value: &QueryResult, level: usize, out: &mut String) {
        let indent0 = "    ".repeat(level - 1);
        let indent = "    ".repeat(level);

        out.push_str(&indent0);
        out.push('<');
        out.push_str(&value.name);
        for (key, attr) in &value.attrs {
            out.push_str(&format!(" {}=\"{}\"", key, escape(attr)));
        }
        out.push_str(">\n");

        for (key, prop) in &value.properties {
            match prop {
                Value::Str(s) => {
                    out.push_str(&format!("{indent}<{key}>{}</{key}>\n", escape(s)));
                }
                Value::Multi(m) => self.format_multi(m, level + 1, out),
                Value::Binary(bytes) => {
                    out.push_str(&format!("{indent}<{key}>"));
                    for (i, b) in bytes.iter().enumerate() {
                        if i > 0 {
                            out.push(' ');
                        }
                        out.push_str(&format!("{b:02X}"));
                    }
                    out.push_str(&format!("</{key}>\n"));
                }
            }
        }

        out.push_str(&format!("{indent0}</{}>\n", value.name));
    }
}

/// Accept/deny filter over hierarchical dot-separated notification types.
///
/// A lookup walks the type path from most to least specific; the first
/// entry found wins, otherwise the default applies.
#[derive(Debug)]
pub struct TypeFilter {
    entries: BTreeMap<String, bool>,
    accept_by_default: bool,
}

impl Default for TypeFilter {
    /// Deny everything except command query output, the quiet baseline a
    /// scenario file widens with `simulator.notifFilter.accept(...)`.
    fn default() -> Self {
        let mut filter = TypeFilter::new(false);
        filter.accept("simulator.exec.query");
        filter
    }
}

impl TypeFilter {
    pub fn new(accept_by_default: bool) -> Self {
        TypeFilter { entries: BTreeMap::new(), accept_by_default }
    }

    pub fn accept(&mut self, notification_type: impl Into<String>) {
        self.entries.insert(notification_type.into(), true);
    }

    pub fn deny(&mut self, notification_type: impl Into<String>) {
        self.entries.insert(notification_type.into(), false);
    }

    pub fn set_default(&mut self, accept_by_default: bool) {
        self.accept_by_default = accept_by_default;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_accepted(&self, notification_type: &str) -> bool {
        let mut current = notification_type;
        loop {
            if let Some(&accepted) = self.entries.get(current) {
                return accepted;
            }
            match current.rfind('.') {
                Some(pos) => current = &current[..pos],
                None => return self.accept_by_default,
            }
        }
    }
}

enum Sink {
    Stdout,
    Path(PathBuf),
    Writer(Box<dyn Write>),
}

impl std::fmt::Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sink::Stdout => f.write_str("Stdout"),
            Sink::Path(p) => write!(f, "Path({})", p.display()),
            Sink::Writer(_) => f.write_str("Writer"),
        }
    }
}

/// Writes formatted notifications to the output stream, opening it lazily
/// and bracketing everything with the formatter's start/finish strings.
pub struct Notificator {
    pub formatter: XmlFormatter,
    sink: Option<Sink>,
    open: Option<Box<dyn Write>>,
}

impl std::fmt::Debug for Notificator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notificator")
            .field("formatter", &self.formatter)
            .field("sink", &self.sink)
            .field("open", &self.open.is_some())
            .finish()
    }
}

impl Default for Notificator {
    fn default() -> Self {
        Notificator { formatter: XmlFormatter::default(), sink: Some(Sink::Stdout), open: None }
    }
}

impl Notificator {
    pub fn set_path(&mut self, path: PathBuf) {
        self.sink = Some(Sink::Path(path));
    }

    pub fn set_writer(&mut self, writer: Box<dyn Write>) {
        self.sink = Some(Sink::Writer(writer));
    }

    pub fn write(&mut self, qr: &QueryResult) -> io::Result<()> {
        if self.open.is_none() {
            let mut writer: Box<dyn Write> = match self.sink.take() {
                Some(Sink::Stdout) | None => Box::new(io::stdout()),
                Some(Sink::Path(path)) => Box::new(BufWriter::new(File::create(path)?)),
                Some(Sink::Writer(w)) => w,
            };
            writer.write_all(self.formatter.start().as_bytes())?;
            self.open = Some(writer);
        }
        let formatted = self.formatter.format(qr);
        if let Some(writer) = &mut self.open {
            writer.write_all(formatted.as_bytes())?;
        }
        Ok(())
    }

    /// Write the closing tag and flush, opening the stream first when
    /// nothing was ever written so the output is still a well-formed
    /// document.
    pub fn close(&mut self) -> io::Result<()> {
        if self.open.is_none() {
            let mut writer: Box<dyn Write> = match self.sink.take() {
                Some(Sink::Stdout) | None => Box::new(io::stdout()),
                Some(Sink::Path(path)) => Box::new(BufWriter::new(File::create(path)?)),
                Some(Sink::Writer(w)) => w,
            };
            writer.write_all(self.formatter.start().as_bytes())?;
            self.open = Some(writer);
        }
        if let Some(mut writer) = self.open.take() {
            writer.write_all(self.formatter.finish().as_bytes())?;
            writer.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xml_nests_and_escapes() {
        let mut inner = QueryResult::with_id("Packet", "PAR");
        inner.insert("physicalAddress", "AA:BB:CC:DD:EE:FF");
        let mut qr = QueryResult::new("node.sent");
        qr.set_attr("time", "0.1 s");
        qr.insert("note", "a < b & c");
        qr.insert_multi(inner);

        let xml = XmlFormatter::default().format(&qr);
        assert!(xml.contains("<node.sent time=\"0.1 s\">"));
        assert!(xml.contains("<note>a &lt; b &amp; c</note>"));
        assert!(xml.contains("<Packet id=\"PAR\">"));
        assert!(xml.contains("    <Packet"));
    }

    #[test]
    fn stylesheet_reference_precedes_root() {
        let mut f = XmlFormatter::default();
        f.set_stylesheet("pretty.xsl");
        assert!(f.start().starts_with("<?xml-stylesheet"));
        assert!(f.start().ends_with("<simulation>\n"));
    }

    #[test]
    fn filter_walks_the_type_hierarchy() {
        let mut filter = TypeFilter::new(false);
        filter.accept("node.sent");
        filter.deny("node.sent.hcpacket.hb");
        assert!(filter.is_accepted("node.sent.hcpacket.par"));
        assert!(!filter.is_accepted("node.sent.hcpacket.hb"));
        assert!(!filter.is_accepted("node.received"));
        filter.set_default(true);
        assert!(filter.is_accepted("node.received"));
    }

    #[test]
    fn default_filter_only_accepts_exec_queries() {
        let filter = TypeFilter::default();
        assert!(filter.is_accepted("simulator.exec.query"));
        assert!(!filter.is_accepted("simulator.exec"));
        assert!(!filter.is_accepted("node.connected"));
    }

    #[test]
    fn notificator_brackets_the_document() {
        let mut n = Notificator::default();
        let buffer: Vec<u8> = Vec::new();
        let shared = std::sync::Arc::new(std::sync::Mutex::new(buffer));
        struct Shared(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);
        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.lock().expect("lock").extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        n.set_writer(Box::new(Shared(shared.clone())));
        n.write(&QueryResult::new("ping")).unwrap();
        n.close().unwrap();
        let text = String::from_utf8(shared.lock().expect("lock").clone()).unwrap();
        assert!(text.starts_with("<simulation>\n"));
        assert!(text.contains("<ping>"));
        assert!(text.ends_with("</simulation>\n"));
    }
}
