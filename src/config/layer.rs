// src/config/layer.rs

//! A single configuration file and its parsed sections
//!
//! Documents look like:
//!
//! ```xml
//! <configuration>
//!   <packageSources>
//!     <clear />
//!     <add key="local" value="./feed" />
//!   </packageSources>
//!   <packageSourceCredentials>
//!     <local>
//!       <add key="Username" value="user" />
//!     </local>
//!   </packageSourceCredentials>
//! </configuration>
//! ```
//!
//! Entry order is significant: a `clear` resets everything added before it
//! in the same section of the same file.

use crate::error::{Error, Result};
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

const ROOT_ELEMENT: &str = "configuration";
const ADD_ELEMENT: &str = "add";
const CLEAR_ELEMENT: &str = "clear";
const KEY_ATTRIBUTE: &str = "key";
const VALUE_ATTRIBUTE: &str = "value";

/// Whether a layer may be written to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerAccess {
    Writable,
    /// Machine-wide layers are provisioned centrally and never saved
    ReadOnly,
}

/// One ordered entry of a section
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Add { key: String, value: String },
    Clear,
}

/// A named section with ordered entries and nested subsections
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub entries: Vec<Entry>,
    pub children: Vec<Section>,
}

impl Section {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Live `add` entries after applying `clear` tombstones
    fn live_entries(&self) -> Vec<(&str, &str)> {
        let mut values = Vec::new();
        for entry in &self.entries {
            match entry {
                Entry::Add { key, value } => values.push((key.as_str(), value.as_str())),
                Entry::Clear => values.clear(),
            }
        }
        values
    }

    fn upsert(&mut self, key: &str, value: &str) {
        // Entries before the last `clear` are dead; rewriting one would stay hidden
        let live_from = self
            .entries
            .iter()
            .rposition(|entry| matches!(entry, Entry::Clear))
            .map_or(0, |index| index + 1);

        let existing = self.entries[live_from..].iter_mut().rev().find_map(|entry| match entry {
            Entry::Add { key: k, value: v } if k.eq_ignore_ascii_case(key) => Some(v),
            _ => None,
        });

        match existing {
            Some(v) => *v = value.to_string(),
            None => self.entries.push(Entry::Add {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }
}

/// Outcome of looking a key up in one layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lookup {
    /// The layer has no opinion; the previous match stands
    Untouched,
    /// A `clear` was the last thing affecting the key
    Cleared,
    /// Index of the winning `add` entry within the section
    Found(usize),
}

/// One configuration file's parsed contents
#[derive(Debug, Clone)]
pub struct ConfigLayer {
    path: PathBuf,
    access: LayerAccess,
    sections: Vec<Section>,
}

impl ConfigLayer {
    /// Create an empty in-memory layer for the given path
    pub fn empty(path: impl Into<PathBuf>, access: LayerAccess) -> Self {
        Self {
            path: path.into(),
            access,
            sections: Vec::new(),
        }
    }

    /// Load and parse an existing configuration file
    pub fn load(path: &Path, access: LayerAccess) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::ConfigurationParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(path, &content, access)
    }

    /// Load a configuration file, creating an empty document when it is missing
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path, LayerAccess::Writable);
        }

        debug!("Creating configuration file at {}", path.display());
        let layer = Self::empty(path, LayerAccess::Writable);
        layer.save()?;
        Ok(layer)
    }

    /// Parse document text that belongs to `path`
    pub fn parse(path: &Path, content: &str, access: LayerAccess) -> Result<Self> {
        #[derive(Clone, Copy)]
        enum Frame {
            Root,
            Section,
            Subsection,
            Other,
        }

        let parse_error = |message: String| Error::ConfigurationParse {
            path: path.to_path_buf(),
            message,
        };

        let mut reader = Reader::from_str(content);
        reader.trim_text(true);

        let mut sections: Vec<Section> = Vec::new();
        let mut stack: Vec<Frame> = Vec::new();
        let mut saw_root = false;

        loop {
            let event = reader
                .read_event()
                .map_err(|e| parse_error(format!("at position {}: {}", reader.buffer_position(), e)))?;

            let (element, is_start) = match event {
                Event::Start(e) => (e, true),
                Event::Empty(e) => (e, false),
                Event::End(_) => {
                    stack.pop();
                    continue;
                }
                Event::Eof => break,
                _ => continue,
            };

            let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
            let frame = match stack.last().copied() {
                None => {
                    if saw_root {
                        return Err(parse_error("multiple root elements".to_string()));
                    }
                    saw_root = true;
                    Frame::Root
                }
                Some(Frame::Root) => {
                    sections.push(Section::new(decode_name(&name)));
                    Frame::Section
                }
                Some(Frame::Section) => {
                    let Some(section) = sections.last_mut() else {
                        return Err(parse_error("entry outside of a section".to_string()));
                    };
                    match read_entry(&element, &name).map_err(parse_error)? {
                        Some(entry) => {
                            section.entries.push(entry);
                            Frame::Other
                        }
                        None => {
                            section.children.push(Section::new(decode_name(&name)));
                            Frame::Subsection
                        }
                    }
                }
                Some(Frame::Subsection) => {
                    let child = sections.last_mut().and_then(|s| s.children.last_mut());
                    if let (Some(child), Some(entry)) =
                        (child, read_entry(&element, &name).map_err(parse_error)?)
                    {
                        child.entries.push(entry);
                    }
                    Frame::Other
                }
                Some(Frame::Other) => Frame::Other,
            };

            if is_start {
                stack.push(frame);
            }
        }

        if !saw_root {
            return Err(parse_error("missing root element".to_string()));
        }

        Ok(Self {
            path: path.to_path_buf(),
            access,
            sections,
        })
    }

    /// Path of the file backing this layer
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory that relative path values are anchored to
    pub fn directory(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new(""))
    }

    pub fn access(&self) -> LayerAccess {
        self.access
    }

    pub fn is_machine_wide(&self) -> bool {
        self.access == LayerAccess::ReadOnly
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    fn section_mut(&mut self, name: &str) -> &mut Section {
        let index = match self.sections.iter().position(|s| s.name == name) {
            Some(index) => index,
            None => {
                self.sections.push(Section::new(name));
                self.sections.len() - 1
            }
        };
        &mut self.sections[index]
    }

    pub(crate) fn lookup(&self, section: &str, key: &str) -> Lookup {
        let Some(section) = self.section(section) else {
            return Lookup::Untouched;
        };

        let mut outcome = Lookup::Untouched;
        for (index, entry) in section.entries.iter().enumerate() {
            match entry {
                Entry::Clear => outcome = Lookup::Cleared,
                Entry::Add { key: k, .. } if k.eq_ignore_ascii_case(key) => {
                    outcome = Lookup::Found(index)
                }
                Entry::Add { .. } => {}
            }
        }
        outcome
    }

    /// Value of the `add` entry at `index` of `section`, path-resolved on request
    pub(crate) fn value_at(&self, section: &str, index: usize, is_path: bool) -> Option<String> {
        match self.section(section)?.entries.get(index)? {
            Entry::Add { value, .. } => Some(self.resolve_value(value, is_path)),
            Entry::Clear => None,
        }
    }

    /// `(key, value)` pairs of a section with this layer's own `clear` entries applied
    pub(crate) fn values(&self, section: &str, is_path: bool) -> Vec<(String, String)> {
        self.section(section)
            .map(|s| {
                s.live_entries()
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), self.resolve_value(v, is_path)))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn nested_values(&self, section: &str, subsection: &str) -> Vec<(String, String)> {
        self.section(section)
            .and_then(|s| s.children.iter().find(|c| c.name == subsection))
            .map(|c| {
                c.live_entries()
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn set_value(&mut self, section: &str, key: &str, value: &str) -> Result<()> {
        self.section_mut(section).upsert(key, value);
        self.save()
    }

    pub(crate) fn set_values(&mut self, section: &str, values: &[(String, String)]) -> Result<()> {
        let target = self.section_mut(section);
        for (key, value) in values {
            target.upsert(key, value);
        }
        self.save()
    }

    pub(crate) fn set_nested_values(
        &mut self,
        section: &str,
        subsection: &str,
        values: &[(String, String)],
    ) -> Result<()> {
        let parent = self.section_mut(section);
        let index = match parent.children.iter().position(|c| c.name == subsection) {
            Some(index) => index,
            None => {
                parent.children.push(Section::new(subsection));
                parent.children.len() - 1
            }
        };

        let child = &mut parent.children[index];
        for (key, value) in values {
            child.upsert(key, value);
        }
        self.save()
    }

    pub(crate) fn delete_value(&mut self, section: &str, key: &str) -> Result<bool> {
        let Some(index) = self.sections.iter().position(|s| s.name == section) else {
            return Ok(false);
        };

        let entries = &mut self.sections[index].entries;
        let before = entries.len();
        entries.retain(|e| !matches!(e, Entry::Add { key: k, .. } if k.eq_ignore_ascii_case(key)));
        if entries.len() == before {
            return Ok(false);
        }

        self.save()?;
        Ok(true)
    }

    pub(crate) fn delete_section(&mut self, section: &str) -> Result<bool> {
        let before = self.sections.len();
        self.sections.retain(|s| s.name != section);
        if self.sections.len() == before {
            return Ok(false);
        }

        self.save()?;
        Ok(true)
    }

    /// Serialize the layer to its file
    pub(crate) fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        fs::write(&self.path, self.to_xml()?)?;
        debug!("Saved configuration file {}", self.path.display());
        Ok(())
    }

    fn to_xml(&self) -> Result<Vec<u8>> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

        if self.sections.is_empty() {
            writer.write_event(Event::Empty(BytesStart::new(ROOT_ELEMENT)))?;
            return Ok(writer.into_inner());
        }

        writer.write_event(Event::Start(BytesStart::new(ROOT_ELEMENT)))?;
        for section in &self.sections {
            write_section(&mut writer, section)?;
        }
        writer.write_event(Event::End(BytesEnd::new(ROOT_ELEMENT)))?;

        Ok(writer.into_inner())
    }

    fn resolve_value(&self, value: &str, is_path: bool) -> String {
        if !is_path || value.is_empty() || value.contains("://") {
            return value.to_string();
        }

        let path = Path::new(value);
        if path.is_absolute() {
            return value.to_string();
        }

        normalize(&self.directory().join(path))
            .to_string_lossy()
            .into_owned()
    }
}

fn write_section(writer: &mut Writer<Vec<u8>>, section: &Section) -> Result<()> {
    let name = encode_name(&section.name);
    if section.entries.is_empty() && section.children.is_empty() {
        writer.write_event(Event::Empty(BytesStart::new(name.as_str())))?;
        return Ok(());
    }

    writer.write_event(Event::Start(BytesStart::new(name.as_str())))?;
    for entry in &section.entries {
        match entry {
            Entry::Add { key, value } => {
                let mut add = BytesStart::new(ADD_ELEMENT);
                add.push_attribute((KEY_ATTRIBUTE, key.as_str()));
                add.push_attribute((VALUE_ATTRIBUTE, value.as_str()));
                writer.write_event(Event::Empty(add))?;
            }
            Entry::Clear => {
                writer.write_event(Event::Empty(BytesStart::new(CLEAR_ELEMENT)))?;
            }
        }
    }
    for child in &section.children {
        write_section(writer, child)?;
    }
    writer.write_event(Event::End(BytesEnd::new(name.as_str())))?;
    Ok(())
}

/// Interpret an element inside a section; `None` means it opens a subsection
fn read_entry(element: &BytesStart<'_>, name: &str) -> std::result::Result<Option<Entry>, String> {
    if name.eq_ignore_ascii_case(CLEAR_ELEMENT) {
        return Ok(Some(Entry::Clear));
    }
    if !name.eq_ignore_ascii_case(ADD_ELEMENT) {
        return Ok(None);
    }

    let mut key = None;
    let mut value = None;
    for attr in element.attributes() {
        let attr = attr.map_err(|e| format!("invalid attribute: {}", e))?;
        let text = attr
            .unescape_value()
            .map_err(|e| format!("invalid attribute value: {}", e))?
            .into_owned();
        match attr.key.as_ref() {
            b"key" => key = Some(text),
            b"value" => value = Some(text),
            _ => {}
        }
    }

    let key = key.ok_or_else(|| "'add' element is missing the 'key' attribute".to_string())?;
    let value = value.ok_or_else(|| format!("'add' element '{}' is missing the 'value' attribute", key))?;
    Ok(Some(Entry::Add { key, value }))
}

/// Escape characters that cannot appear in an XML element name as `_xHHHH_`
pub fn encode_name(name: &str) -> String {
    let mut encoded = String::with_capacity(name.len());
    for (index, (offset, ch)) in name.char_indices().enumerate() {
        let valid = if index == 0 {
            ch.is_alphabetic() || ch == '_'
        } else {
            ch.is_alphanumeric() || matches!(ch, '_' | '-' | '.')
        };

        // A literal `_xHHHH_` must not decode as an escape
        if ch == '_' && starts_escape(&name[offset..]) {
            encoded.push_str("_x005F_");
        } else if valid {
            encoded.push(ch);
        } else {
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                encoded.push_str(&format!("_x{:04X}_", unit));
            }
        }
    }
    encoded
}

fn starts_escape(text: &str) -> bool {
    text.strip_prefix("_x")
        .filter(|r| r.len() >= 5 && r.as_bytes()[4] == b'_')
        .is_some_and(|r| r.as_bytes()[..4].iter().all(u8::is_ascii_hexdigit))
}

/// Reverse of [`encode_name`]
pub fn decode_name(name: &str) -> String {
    if !name.contains("_x") {
        return name.to_string();
    }

    let mut units: Vec<u16> = Vec::with_capacity(name.len());
    let mut rest = name;
    while !rest.is_empty() {
        if let Some(unit) = rest
            .strip_prefix("_x")
            .filter(|r| r.len() >= 5 && r.as_bytes()[4] == b'_')
            .and_then(|r| u16::from_str_radix(&r[..4], 16).ok())
        {
            units.push(unit);
            rest = &rest[7..];
            continue;
        }

        let ch = rest.chars().next().unwrap_or_default();
        let mut buf = [0u16; 2];
        units.extend_from_slice(ch.encode_utf16(&mut buf));
        rest = &rest[ch.len_utf8()..];
    }

    String::from_utf16_lossy(&units)
}

/// Collapse `.` and `..` components without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}
