//! OPC Package implementation
//!
//! Handles reading and writing VSIX (and other OPC-based) files as ZIP
//! packages: a single-owner, in-memory view of parts, content types and
//! relationships that is materialized back to a ZIP archive on `flush`.

use crate::error::{Error, Result};
use crate::opc::relationships::rel_types;
use crate::opc::{ContentTypes, Part, PartUri, Relationships};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use zip::read::ZipArchive;
use zip::write::{FileOptions, ZipWriter};
use zip::CompressionMethod;

/// Whether a [`Package`] was opened for mutation.
///
/// `ReadOnly` failures are a type-level property of the handle rather than
/// a runtime check scattered through every mutator: every mutating method
/// checks `self.mode` once, at the top, and returns [`Error::ReadOnly`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

/// An OPC package (ZIP-based container for VSIX, DOCX, XLSX, ...).
///
/// `Package` is single-owner: at most one thread is expected to mutate a
/// given instance at a time. It is intentionally `!Sync`-shaped (no
/// internal locking) — callers that want to sign independent packages
/// concurrently simply open one `Package` per thread.
#[derive(Debug)]
pub struct Package {
    parts: HashMap<PartUri, Part>,
    relationships: Relationships,
    content_types: ContentTypes,
    mode: OpenMode,
    source_path: Option<PathBuf>,
}

impl Package {
    /// Create a new, empty, in-memory package (read-write, no backing file).
    pub fn new() -> Self {
        Self {
            parts: HashMap::new(),
            relationships: Relationships::new(),
            content_types: ContentTypes::new(),
            mode: OpenMode::ReadWrite,
            source_path: None,
        }
    }

    /// Open a package from a file path for mutation. `flush()` will
    /// overwrite this same path.
    pub fn open_read_write<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut pkg = Self::open_from_path(path.as_ref())?;
        pkg.mode = OpenMode::ReadWrite;
        pkg.source_path = Some(path.as_ref().to_path_buf());
        Ok(pkg)
    }

    /// Open a package from a file path without the ability to mutate it.
    /// Any attempted write fails with [`Error::ReadOnly`].
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut pkg = Self::open_from_path(path.as_ref())?;
        pkg.mode = OpenMode::ReadOnly;
        pkg.source_path = Some(path.as_ref().to_path_buf());
        Ok(pkg)
    }

    fn open_from_path(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        Self::from_reader(reader)
    }

    /// Open a package from bytes, as a read-write, in-memory package with
    /// no backing file (`flush` will fail; use [`Package::to_bytes`]
    /// instead).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let cursor = Cursor::new(bytes);
        Self::from_reader(cursor)
    }

    /// Open a package from a reader.
    pub fn from_reader<R: Read + Seek>(reader: R) -> Result<Self> {
        let mut archive = ZipArchive::new(reader)?;
        let mut package = Self::new();

        package.content_types = Self::read_content_types(&mut archive)?;
        package.relationships = Self::read_package_rels(&mut archive)?;
        package.read_parts(&mut archive)?;
        package.read_part_relationships(&mut archive)?;

        Ok(package)
    }

    /// Whether this package was opened read-only.
    pub fn is_read_only(&self) -> bool {
        self.mode == OpenMode::ReadOnly
    }

    fn check_writable(&self) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            return Err(Error::ReadOnly);
        }
        Ok(())
    }

    /// Flush the package back to its originating path, atomically.
    ///
    /// Serializes everything into a fresh [`tempfile::NamedTempFile`] in
    /// the same directory as the destination, then renames it over the
    /// original — a crash mid-flush never corrupts the original archive.
    pub fn flush(&self) -> Result<()> {
        self.check_writable()?;
        let path = self
            .source_path
            .as_ref()
            .ok_or_else(|| Error::MalformedPackage("package has no backing file to flush to".into()))?;

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        self.write_to(tmp.as_file_mut())?;
        tmp.persist(path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    /// Save the package to an arbitrary file path (does not affect
    /// `source_path`/`flush`).
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        self.write_to(file)
    }

    /// Serialize the package to an in-memory byte buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let cursor = Cursor::new(&mut buf);
        self.write_to(cursor)?;
        Ok(buf)
    }

    /// Write the package to a writer.
    pub fn write_to<W: Write + Seek>(&self, writer: W) -> Result<()> {
        let mut zip = ZipWriter::new(writer);
        let options: FileOptions<()> =
            FileOptions::default().compression_method(CompressionMethod::Deflated);

        zip.start_file("[Content_Types].xml", options)?;
        self.content_types.write_to(&mut zip)?;

        if !self.relationships.is_empty() {
            zip.start_file("_rels/.rels", options)?;
            self.relationships.write_to(&mut zip)?;
        }

        let mut uris: Vec<&PartUri> = self.parts.keys().collect();
        uris.sort_by(|a, b| a.as_str().cmp(b.as_str()));

        for uri in uris {
            let part = &self.parts[uri];
            let path = uri.zip_entry_name();
            zip.start_file(path, options)?;
            zip.write_all(part.data())?;

            if let Some(rels) = part.relationships() {
                if !rels.is_empty() {
                    let rels_uri = uri.relationships_uri();
                    let rels_path = rels_uri.zip_entry_name();
                    zip.start_file(rels_path, options)?;
                    rels.write_to(&mut zip)?;
                }
            }
        }

        zip.finish()?;
        Ok(())
    }

    /// Get a part by URI
    pub fn part(&self, uri: &PartUri) -> Option<&Part> {
        self.parts.get(uri)
    }

    /// Get a mutable part by URI
    pub fn part_mut(&mut self, uri: &PartUri) -> Option<&mut Part> {
        self.parts.get_mut(uri)
    }

    /// Does the package contain a part at this URI?
    pub fn has_part(&self, uri: &PartUri) -> bool {
        self.parts.contains_key(uri)
    }

    /// Add a part to the package, registering its content type as an
    /// `Override` entry.
    pub fn add_part(&mut self, part: Part) -> Result<()> {
        self.check_writable()?;
        let uri = part.uri().clone();
        self.content_types.add_override(&uri, part.content_type());
        self.parts.insert(uri, part);
        Ok(())
    }

    /// Write (insert or replace) raw bytes at a part URI with a content
    /// type, creating the part if it does not already exist.
    pub fn write_part(&mut self, uri: &PartUri, content_type: &str, data: Vec<u8>) -> Result<()> {
        self.check_writable()?;
        self.content_types.add_override(uri, content_type);
        match self.parts.get_mut(uri) {
            Some(existing) => existing.set_data(data),
            None => {
                self.parts
                    .insert(uri.clone(), Part::new(uri.clone(), content_type, data));
            }
        }
        Ok(())
    }

    /// Remove a part from the package
    pub fn remove_part(&mut self, uri: &PartUri) -> Result<Option<Part>> {
        self.check_writable()?;
        self.content_types.remove_override(uri);
        Ok(self.parts.remove(uri))
    }

    /// Get all part URIs
    pub fn part_uris(&self) -> impl Iterator<Item = &PartUri> {
        self.parts.keys()
    }

    /// Get all parts
    pub fn parts(&self) -> impl Iterator<Item = (&PartUri, &Part)> {
        self.parts.iter()
    }

    /// Get package-level (root) relationships
    pub fn relationships(&self) -> &Relationships {
        &self.relationships
    }

    /// Get mutable package-level relationships. Callers are responsible
    /// for calling [`Package::check_writable`]-equivalent checks; this
    /// accessor itself does not fail, but every package-level mutation
    /// performed through the engine goes through [`Package::add_relationship`]
    /// which does.
    pub fn relationships_mut(&mut self) -> &mut Relationships {
        &mut self.relationships
    }

    /// Get content types
    pub fn content_types(&self) -> &ContentTypes {
        &self.content_types
    }

    /// Get mutable content types
    pub fn content_types_mut(&mut self) -> &mut ContentTypes {
        &mut self.content_types
    }

    /// Get a part by relationship type from the root relationships
    pub fn part_by_rel_type(&self, rel_type: &str) -> Option<&Part> {
        let rel = self.relationships.by_type(rel_type)?;
        let uri = PartUri::new(&rel.target).ok()?;
        self.parts.get(&uri)
    }

    /// Add a root-level relationship, failing if the package is read-only.
    pub fn add_relationship(&mut self, rel_type: &str, target: &str) -> Result<String> {
        self.check_writable()?;
        Ok(self.relationships.add(rel_type, target))
    }

    /// Does the root already have a relationship of this type?
    pub fn has_root_relationship_of_type(&self, rel_type: &str) -> bool {
        self.relationships.by_type(rel_type).is_some()
    }

    // === Private methods ===

    fn read_content_types<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<ContentTypes> {
        let mut file = archive
            .by_name("[Content_Types].xml")
            .map_err(|_| Error::MissingPart("[Content_Types].xml".into()))?;

        let mut content = String::new();
        file.read_to_string(&mut content)?;

        ContentTypes::from_xml(&content)
    }

    fn read_package_rels<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<Relationships> {
        match archive.by_name("_rels/.rels") {
            Ok(mut file) => {
                let mut content = String::new();
                file.read_to_string(&mut content)?;
                Relationships::from_xml(&content)
            }
            Err(_) => Ok(Relationships::new()),
        }
    }

    fn read_parts<R: Read + Seek>(&mut self, archive: &mut ZipArchive<R>) -> Result<()> {
        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            let name = file.name().to_string();

            if name.ends_with('/') {
                continue;
            }
            if name == "[Content_Types].xml" {
                continue;
            }
            if name.contains("_rels/") && name.ends_with(".rels") {
                continue;
            }

            let uri = PartUri::new(&format!("/{}", name))?;

            let content_type = self
                .content_types
                .get(&uri)
                .unwrap_or("application/octet-stream")
                .to_string();

            let mut data = Vec::new();
            file.read_to_end(&mut data)?;

            let part = Part::new(uri.clone(), content_type, data);
            self.parts.insert(uri, part);
        }

        Ok(())
    }

    fn read_part_relationships<R: Read + Seek>(&mut self, archive: &mut ZipArchive<R>) -> Result<()> {
        let part_uris: Vec<PartUri> = self.parts.keys().cloned().collect();

        for uri in part_uris {
            let rels_path = uri.relationships_uri();
            let rels_zip_path = rels_path.zip_entry_name().to_string();

            if let Ok(mut file) = archive.by_name(&rels_zip_path) {
                let mut content = String::new();
                file.read_to_string(&mut content)?;
                let rels = Relationships::from_xml(&content)?;

                if let Some(part) = self.parts.get_mut(&uri) {
                    part.set_relationships(rels);
                }
            }
        }

        Ok(())
    }
}

impl Default for Package {
    fn default() -> Self {
        Self::new()
    }
}
