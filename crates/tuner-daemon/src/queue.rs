use tuner_proto::protocol::{QueueItem, Station};

const MEDIA_ID_PREFIX: &str = "station_";

pub fn media_id(station: &Station) -> String {
    format!("{}{}", MEDIA_ID_PREFIX, station.id)
}

/// Browsable queue for session transports, in saved-list order.
pub fn build_queue(stations: &[Station]) -> Vec<QueueItem> {
    stations
        .iter()
        .enumerate()
        .map(|(i, station)| QueueItem {
            media_id: media_id(station),
            station_id: station.id.clone(),
            number: i + 1,
            title: station.name.clone(),
            subtitle: format!("Station {}", i + 1),
            description: describe(station),
            artwork_url: Some(station.image_url.clone()).filter(|u| !u.trim().is_empty()),
            stream_url: station.url.clone(),
        })
        .collect()
}

/// "language • tag1, tag2", omitting whichever part is empty.
fn describe(station: &Station) -> String {
    let tags = station
        .tags
        .iter()
        .take(2)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    [station.language.trim(), tags.as_str()]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" • ")
}

/// Queue index for a requested item.  Unknown ids fall back to
/// `start_index`, and that to 0 when out of range.
pub fn resolve_start_index(
    items: &[QueueItem],
    requested_media_id: Option<&str>,
    start_index: usize,
) -> usize {
    if let Some(id) = requested_media_id {
        if let Some(index) = items.iter().position(|item| item.media_id == id) {
            return index;
        }
    }
    if start_index < items.len() {
        start_index
    } else {
        0
    }
}

/// Station id for a media id produced by [`build_queue`].
pub fn station_id_from_media_id(media_id: &str) -> Option<&str> {
    media_id.strip_prefix(MEDIA_ID_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stations() -> Vec<Station> {
        let mut a = Station::new("a", "Alpha", "http://a");
        a.language = "french".into();
        a.tags = vec!["jazz".into(), "soul".into(), "funk".into()];
        a.image_url = "http://a/logo.png".into();
        let mut b = Station::new("b", "Beta", "http://b");
        b.tags = vec!["news".into()];
        let c = Station::new("c", "Gamma", "http://c");
        vec![a, b, c]
    }

    #[test]
    fn queue_items_follow_saved_order() {
        let items = build_queue(&stations());
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].media_id, "station_a");
        assert_eq!(items[0].number, 1);
        assert_eq!(items[0].subtitle, "Station 1");
        assert_eq!(items[0].description, "french • jazz, soul");
        assert_eq!(items[0].artwork_url.as_deref(), Some("http://a/logo.png"));
        assert_eq!(items[1].description, "news");
        assert_eq!(items[2].description, "");
        assert_eq!(items[2].artwork_url, None);
        assert_eq!(items[2].subtitle, "Station 3");
    }

    #[test]
    fn start_index_resolution() {
        let items = build_queue(&stations());
        assert_eq!(resolve_start_index(&items, Some("station_c"), 0), 2);
        assert_eq!(resolve_start_index(&items, Some("station_zz"), 1), 1);
        assert_eq!(resolve_start_index(&items, None, 7), 0);
        assert_eq!(resolve_start_index(&[], Some("station_a"), 0), 0);
        assert_eq!(station_id_from_media_id("station_b"), Some("b"));
    }
}
