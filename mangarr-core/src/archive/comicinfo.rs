//! `ComicInfo.xml` generation.

use chrono::Datelike;
use mangarr_model::{Chapter, Manga, Volume, format_number};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use super::ArchiveError;

pub const COMICINFO_NAME: &str = "ComicInfo.xml";

/// Ordered tag/value pairs for one chapter archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComicInfo {
    entries: Vec<(&'static str, String)>,
}

impl ComicInfo {
    /// Collects series, volume and chapter values. Empty values are left
    /// out; the summary is the most specific non-empty description.
    pub fn from_records(manga: &Manga, volume: &Volume, chapter: &Chapter) -> Self {
        let mut info = ComicInfo::default();
        let release = chapter.release_date.value;

        info.push("Series", &manga.name.value);
        info.push("LocalizedSeries", &manga.localized_name.value);
        info.push(
            "Summary",
            [
                &chapter.description.value,
                &volume.description.value,
                &manga.description.value,
            ]
            .into_iter()
            .find(|d| !d.trim().is_empty())
            .map(String::as_str)
            .unwrap_or_default(),
        );
        info.push_list("Genre", &manga.genres.value);
        info.push_list("Tags", &manga.tags.value);
        info.push("Web", &manga.url);
        info.push("Volume", &format_number(volume.number.value));
        info.push("Title", &chapter.name.value);
        info.push("Number", &format_number(chapter.number.value));
        info.push_list("Publisher", &chapter.publisher.value);
        info.push_list("Imprint", &chapter.imprint.value);
        if let Some(date) = release {
            info.push("Year", &date.year().to_string());
            info.push("Month", &date.month().to_string());
            info.push("Day", &date.day().to_string());
        }
        info.push_list("Writer", &chapter.writer.value);
        info.push_list("Penciller", &chapter.penciller.value);
        info.push_list("Inker", &chapter.inker.value);
        info.push_list("Colorist", &chapter.colorist.value);
        info.push_list("Letterer", &chapter.letterer.value);
        info.push_list("CoverArtist", &chapter.cover_artist.value);
        info.push_list("Editor", &chapter.editor.value);
        info.push_list("Translator", &chapter.translator.value);
        if chapter.page_count.value > 0 {
            info.push("PageCount", &chapter.page_count.value.to_string());
        }
        info.push("LanguageISO", &chapter.localization.value);
        info.push("Format", chapter.format.value.label());
        info.push("AgeRating", chapter.age_rating.value.label());
        info.push("GTIN", &chapter.isbn.value);
        info
    }

    fn push(&mut self, tag: &'static str, value: &str) {
        let value = value.trim();
        if !value.is_empty() {
            self.entries.push((tag, value.to_string()));
        }
    }

    fn push_list(&mut self, tag: &'static str, values: &[String]) {
        let joined = values
            .iter()
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .collect::<Vec<_>>()
            .join(", ");
        self.push(tag, &joined);
    }

    pub fn get(&self, tag: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, v)| v.as_str())
    }

    pub fn tags(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(tag, _)| *tag)
    }

    /// Serializes with an XML declaration and two-space indentation.
    pub fn to_xml(&self) -> Result<Vec<u8>, ArchiveError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        write_event(
            &mut writer,
            Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)),
        )?;
        write_event(&mut writer, Event::Start(BytesStart::new("ComicInfo")))?;
        for (tag, value) in &self.entries {
            write_event(&mut writer, Event::Start(BytesStart::new(*tag)))?;
            write_event(&mut writer, Event::Text(BytesText::new(value)))?;
            write_event(&mut writer, Event::End(BytesEnd::new(*tag)))?;
        }
        write_event(&mut writer, Event::End(BytesEnd::new("ComicInfo")))?;
        let mut xml = writer.into_inner();
        xml.push(b'\n');
        Ok(xml)
    }
}

fn write_event(
    writer: &mut Writer<Vec<u8>>,
    event: Event<'_>,
) -> Result<(), ArchiveError> {
    writer
        .write_event(event)
        .map_err(|err| ArchiveError::Xml(err.to_string()))
}
