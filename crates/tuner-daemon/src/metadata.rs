use tuner_proto::protocol::SongInfo;

/// Fields at least this long are treated as junk (ads, station slogans).
const MAX_FIELD_LEN: usize = 100;

/// Turn raw stream metadata into artist/title.
///
/// An "Artist - Title" string (from either field) is split on its first
/// delimiter.  Otherwise distinct artist and title fields are used as-is.
/// Results that merely repeat the station name, or carry overlong fields,
/// are rejected.
pub fn parse(
    stream_title: Option<&str>,
    stream_artist: Option<&str>,
    station_name: &str,
) -> Option<SongInfo> {
    let title = non_blank(stream_title);
    let artist = non_blank(stream_artist);

    let raw = title.or(artist)?;
    let (artist, title) = match raw.split_once(" - ") {
        Some((a, t)) => (a.trim(), t.trim()),
        None => match (artist, title) {
            (Some(a), Some(t)) if a != t => (a, t),
            _ => return None,
        },
    };

    if artist.is_empty() || title.is_empty() {
        return None;
    }
    if is_station_name(artist, station_name) || is_station_name(title, station_name) {
        return None;
    }
    if artist.chars().count() >= MAX_FIELD_LEN || title.chars().count() >= MAX_FIELD_LEN {
        return None;
    }

    Some(SongInfo {
        artist: artist.to_string(),
        title: title.to_string(),
    })
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

fn is_station_name(field: &str, station_name: &str) -> bool {
    field.to_lowercase() == station_name.trim().to_lowercase()
}
