//! Web radio station list in `.pls` format.

use core::fmt::Write as _;

use thiserror::Error;

use crate::truncated;

pub const MAX_ENTRIES: usize = 20;
pub const MAX_TITLE: usize = 63;
pub const MAX_URL: usize = 255;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistError {
    #[error("playlist is full")]
    Full,
    #[error("no playlist entry at index {0}")]
    IndexOutOfRange(usize),
    #[error("{0} too long")]
    TooLong(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlaylistEntry {
    pub title: heapless::String<MAX_TITLE>,
    pub url: heapless::String<MAX_URL>,
}

impl PlaylistEntry {
    pub fn new(title: &str, url: &str) -> Result<Self, PlaylistError> {
        let mut entry = Self::default();
        entry
            .title
            .push_str(title)
            .map_err(|_| PlaylistError::TooLong("title"))?;
        entry
            .url
            .push_str(url)
            .map_err(|_| PlaylistError::TooLong("url"))?;
        Ok(entry)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Playlist {
    entries: heapless::Vec<PlaylistEntry, MAX_ENTRIES>,
}

impl Playlist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `.pls` text. A `TitleN=` line names the next entry and a `FileN=`
    /// line completes it. Unknown lines are skipped, long values are cut and
    /// entries past the capacity are ignored.
    pub fn parse(text: &str) -> Self {
        let mut playlist = Self::new();
        let mut title: heapless::String<MAX_TITLE> = heapless::String::new();

        for line in text.lines() {
            let line = line.trim_end_matches(&['\r', '\n'][..]);
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            if key.starts_with("Title") {
                title = truncated(value);
            } else if key.starts_with("File") {
                if playlist.entries.is_full() {
                    break;
                }
                let entry = PlaylistEntry {
                    title: core::mem::take(&mut title),
                    url: truncated(value),
                };
                // capacity checked above
                let _ = playlist.entries.push(entry);
            }
        }
        playlist
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PlaylistEntry> {
        self.entries.get(index)
    }

    pub fn title(&self, index: usize) -> Option<&str> {
        self.get(index).map(|e| e.title.as_str())
    }

    pub fn url(&self, index: usize) -> Option<&str> {
        self.get(index).map(|e| e.url.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlaylistEntry> {
        self.entries.iter()
    }

    pub fn add(&mut self, title: &str, url: &str) -> Result<usize, PlaylistError> {
        let entry = PlaylistEntry::new(title, url)?;
        self.entries
            .push(entry)
            .map_err(|_| PlaylistError::Full)?;
        Ok(self.entries.len() - 1)
    }

    pub fn remove(&mut self, index: usize) -> Result<PlaylistEntry, PlaylistError> {
        if index >= self.entries.len() {
            return Err(PlaylistError::IndexOutOfRange(index));
        }
        Ok(self.entries.remove(index))
    }

    /// Replace the title and/or URL of an entry. `None` keeps the old value.
    pub fn update(
        &mut self,
        index: usize,
        title: Option<&str>,
        url: Option<&str>,
    ) -> Result<(), PlaylistError> {
        let current = self
            .entries
            .get(index)
            .ok_or(PlaylistError::IndexOutOfRange(index))?;
        let updated = PlaylistEntry::new(
            title.unwrap_or(current.title.as_str()),
            url.unwrap_or(current.url.as_str()),
        )?;
        self.entries[index] = updated;
        Ok(())
    }

    pub fn to_pls(&self) -> String {
        let mut out = String::from("[playlist]\n");
        for (i, entry) in self.entries.iter().enumerate() {
            let n = i + 1;
            // writing to a String cannot fail
            let _ = writeln!(out, "Title{n}={}", entry.title);
            let _ = writeln!(out, "File{n}={}", entry.url);
        }
        let _ = writeln!(out, "NumberOfEntries={}", self.entries.len());
        out.push_str("Version=2\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "[playlist]\r\n\
        Title1=Radio ROKS\r\n\
        File1=http://online.radioroks.ua/RadioROKS\r\n\
        Title2=Jazz\r\n\
        File2=http://example.com/jazz.mp3\r\n\
        NumberOfEntries=2\r\n";

    #[test]
    fn parses_title_file_pairs() {
        let pl = Playlist::parse(SAMPLE);
        assert_eq!(pl.count(), 2);
        assert_eq!(pl.title(0), Some("Radio ROKS"));
        assert_eq!(pl.url(0), Some("http://online.radioroks.ua/RadioROKS"));
        assert_eq!(pl.title(1), Some("Jazz"));
        assert_eq!(pl.url(2), None);
    }

    #[test]
    fn file_without_title_gets_empty_title() {
        let pl = Playlist::parse("File1=http://a\nTitle2=B\nFile2=http://b\n");
        assert_eq!(pl.title(0), Some(""));
        assert_eq!(pl.title(1), Some("B"));
    }

    #[test]
    fn long_values_are_cut_and_capacity_enforced() {
        let mut text = String::new();
        let long_title = "t".repeat(100);
        for i in 0..25 {
            text.push_str(&format!("Title{i}={long_title}\nFile{i}=http://s/{i}\n"));
        }
        let pl = Playlist::parse(&text);
        assert_eq!(pl.count(), MAX_ENTRIES);
        assert_eq!(pl.title(0).map(str::len), Some(MAX_TITLE));
        assert_eq!(pl.url(19), Some("http://s/19"));
    }

    #[test]
    fn edits_and_saves() {
        let mut pl = Playlist::parse(SAMPLE);
        assert_eq!(pl.add("Talk", "http://example.com/talk"), Ok(2));
        pl.update(1, Some("Smooth Jazz"), None).unwrap();
        assert_eq!(pl.url(1), Some("http://example.com/jazz.mp3"));

        let removed = pl.remove(0).unwrap();
        assert_eq!(removed.title.as_str(), "Radio ROKS");
        assert_eq!(pl.remove(5), Err(PlaylistError::IndexOutOfRange(5)));
        assert_eq!(
            pl.add(&"x".repeat(64), "http://x"),
            Err(PlaylistError::TooLong("title"))
        );

        let saved = pl.to_pls();
        assert!(saved.starts_with("[playlist]\n"));
        assert!(saved.contains("NumberOfEntries=2\n"));
        assert_eq!(Playlist::parse(&saved), pl);
    }

    #[test]
    fn add_fails_when_full() {
        let mut pl = Playlist::new();
        for i in 0..MAX_ENTRIES {
            pl.add("s", &format!("http://s/{i}")).unwrap();
        }
        assert_eq!(pl.add("s", "http://s/x"), Err(PlaylistError::Full));
    }
}
