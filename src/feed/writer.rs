use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::collections::HashSet;
use std::io::Write;

use super::{xml_error, FeedError};
use crate::mapping::{FieldValue, MappedItem, MappingError, Platform};
use crate::model::ProductId;
use crate::util::strip_control_chars;

const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
const GOOGLE_NS: &str = "http://base.google.com/ns/1.0";
const FIELD_PREFIX: &str = "g:";

/// Document shape of a feed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    /// `<feed>` with one `<entry>` per item (Google Merchant Center).
    Atom,
    /// RSS 2.0 `<channel>` with one `<item>` per item (Meta catalog).
    Rss,
}

impl FeedFormat {
    pub fn for_platform(platform: Platform) -> Self {
        match platform {
            Platform::Google => FeedFormat::Atom,
            Platform::Meta => FeedFormat::Rss,
        }
    }

    /// Element name wrapping one item.
    pub fn item_element(self) -> &'static str {
        match self {
            FeedFormat::Atom => "entry",
            FeedFormat::Rss => "item",
        }
    }
}

/// Channel-level metadata written once in the prologue.
#[derive(Debug, Clone)]
pub struct FeedHeader {
    pub title: String,
    pub link: String,
    pub description: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub items: usize,
    /// Distinct products among the written items.
    pub products: usize,
}

/// Streaming feed writer: prologue on [`start`](Self::start), one element
/// block per [`write_item`](Self::write_item), epilogue on
/// [`finish`](Self::finish).
///
/// Nothing is buffered beyond the current item. A writer dropped before
/// `finish` leaves an unterminated document behind; callers write into a
/// temporary file and only publish after `finish` succeeds.
pub struct FeedWriter<W: Write> {
    writer: Writer<W>,
    format: FeedFormat,
    items: usize,
    products: HashSet<ProductId>,
}

impl<W: Write> FeedWriter<W> {
    pub fn start(dest: W, format: FeedFormat, header: &FeedHeader) -> Result<Self, FeedError> {
        let mut this = Self {
            writer: Writer::new_with_indent(dest, b' ', 2),
            format,
            items: 0,
            products: HashSet::new(),
        };

        this.event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        match format {
            FeedFormat::Atom => {
                let root = BytesStart::new("feed")
                    .with_attributes([("xmlns", ATOM_NS), ("xmlns:g", GOOGLE_NS)]);
                this.event(Event::Start(root))?;
                this.element("title", &header.title)?;
                let link = BytesStart::new("link")
                    .with_attributes([("rel", "self"), ("href", header.link.as_str())]);
                this.event(Event::Empty(link))?;
                this.element(
                    "updated",
                    &header
                        .generated_at
                        .to_rfc3339_opts(SecondsFormat::Secs, true),
                )?;
            }
            FeedFormat::Rss => {
                let root = BytesStart::new("rss")
                    .with_attributes([("xmlns:g", GOOGLE_NS), ("version", "2.0")]);
                this.event(Event::Start(root))?;
                this.event(Event::Start(BytesStart::new("channel")))?;
                this.element("title", &header.title)?;
                this.element("link", &header.link)?;
                this.element("description", &header.description)?;
                this.element("lastBuildDate", &header.generated_at.to_rfc2822())?;
            }
        }
        Ok(this)
    }

    pub fn write_item(&mut self, item: &MappedItem) -> Result<(), FeedError> {
        let wrapper = self.format.item_element();
        self.event(Event::Start(BytesStart::new(wrapper)))?;

        for (name, value) in item.fields() {
            let tag = format!("{FIELD_PREFIX}{name}");
            match value {
                FieldValue::Text(text) => self.element(&tag, text)?,
                FieldValue::Number(number) => self.element(&tag, &number.to_string())?,
                FieldValue::List(entries) => {
                    for entry in entries.iter().filter(|e| !e.trim().is_empty()) {
                        self.element(&tag, entry)?;
                    }
                }
                FieldValue::Group(fields) => {
                    self.event(Event::Start(BytesStart::new(tag.as_str())))?;
                    for (sub, text) in fields {
                        self.element(&format!("{FIELD_PREFIX}{sub}"), text)?;
                    }
                    self.event(Event::End(BytesEnd::new(tag.as_str())))?;
                }
                FieldValue::Markup(markup) => self.cdata_element(&tag, markup)?,
            }
        }

        self.event(Event::End(BytesEnd::new(wrapper)))?;
        self.items += 1;
        self.products.insert(item.product_id);
        Ok(())
    }

    /// Writes the epilogue and hands back the destination.
    pub fn finish(mut self) -> Result<(W, WriteSummary), FeedError> {
        if self.format == FeedFormat::Rss {
            self.event(Event::End(BytesEnd::new("channel")))?;
        }
        let root = match self.format {
            FeedFormat::Atom => "feed",
            FeedFormat::Rss => "rss",
        };
        self.event(Event::End(BytesEnd::new(root)))?;

        let summary = WriteSummary {
            items: self.items,
            products: self.products.len(),
        };
        let mut dest = self.writer.into_inner();
        dest.write_all(b"\n")?;
        dest.flush()?;
        Ok((dest, summary))
    }

    fn event(&mut self, event: Event<'_>) -> Result<(), FeedError> {
        self.writer.write_event(event).map_err(xml_error)
    }

    fn element(&mut self, name: &str, text: &str) -> Result<(), FeedError> {
        let text = strip_control_chars(text);
        self.event(Event::Start(BytesStart::new(name)))?;
        self.event(Event::Text(BytesText::new(&text)))?;
        self.event(Event::End(BytesEnd::new(name)))
    }

    fn cdata_element(&mut self, name: &str, markup: &str) -> Result<(), FeedError> {
        let markup = strip_control_chars(markup);
        // A CDATA section cannot contain its own terminator
        if markup.contains("]]>") {
            return self.element(name, &markup);
        }
        self.event(Event::Start(BytesStart::new(name)))?;
        self.event(Event::CData(BytesCData::new(&*markup)))?;
        self.event(Event::End(BytesEnd::new(name)))
    }
}

/// Drains `items` into a complete document.
///
/// The first mapping error aborts the feed; whatever was written to `dest`
/// up to that point is incomplete and must be discarded.
pub fn write_feed<W, I>(
    items: I,
    dest: W,
    format: FeedFormat,
    header: &FeedHeader,
) -> Result<(W, WriteSummary), FeedError>
where
    W: Write,
    I: IntoIterator<Item = Result<MappedItem, MappingError>>,
{
    let mut writer = FeedWriter::start(dest, format, header)?;
    for item in items {
        writer.write_item(&item?)?;
    }
    writer.finish()
}
