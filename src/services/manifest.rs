//! HLS playlist rendering for finished renditions.

use crate::models::quality::Quality;
use crate::services::blob::segment_name;

/// Media playlist for one rendition. `segments` are the per-segment
/// durations in milliseconds, in order; URIs are relative to the playlist.
pub fn media_playlist(segments: &[u64]) -> String {
    let target = segments
        .iter()
        .map(|ms| ms.div_ceil(1000))
        .max()
        .unwrap_or(1)
        .max(1);

    let mut playlist = String::from("#EXTM3U\n");
    playlist.push_str("#EXT-X-VERSION:3\n");
    playlist.push_str(&format!("#EXT-X-TARGETDURATION:{}\n", target));
    playlist.push_str("#EXT-X-MEDIA-SEQUENCE:0\n");
    playlist.push_str("#EXT-X-PLAYLIST-TYPE:VOD\n");

    for (index, ms) in segments.iter().enumerate() {
        playlist.push_str(&format!("#EXTINF:{:.3},\n", *ms as f64 / 1000.0));
        playlist.push_str(&segment_name(index as u32));
        playlist.push('\n');
    }

    playlist.push_str("#EXT-X-ENDLIST\n");
    playlist
}

/// Master playlist listing every encoded rendition, highest bitrate first.
pub fn master_playlist(qualities: &[Quality]) -> String {
    let mut tiers: Vec<Quality> = qualities
        .iter()
        .copied()
        .filter(|q| q.dimensions().is_some())
        .collect();
    tiers.sort_by_key(|q| std::cmp::Reverse(q.bitrate_kbps()));

    let mut playlist = String::from("#EXTM3U\n");
    playlist.push_str("#EXT-X-VERSION:3\n");

    for q in tiers {
        let Some((width, height)) = q.dimensions() else { continue };
        let bandwidth = q.bitrate_kbps().unwrap_or(0) as u64 * 1000;
        playlist.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{},CODECS=\"avc1.42001E,mp4a.40.2\"\n",
            bandwidth, width, height
        ));
        playlist.push_str(&format!("{}/index.m3u8\n", q.label()));
    }

    playlist
}

/// Splits a source of `duration_ms` into segment durations of at most
/// `segment_ms`. A zero-length source still yields one segment.
pub fn segment_plan(duration_ms: u64, segment_ms: u64) -> Vec<u64> {
    let segment_ms = segment_ms.max(1);
    if duration_ms == 0 {
        return vec![segment_ms];
    }
    let count = duration_ms.div_ceil(segment_ms);
    (0..count)
        .map(|i| (duration_ms - i * segment_ms).min(segment_ms))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_has_short_tail() {
        assert_eq!(segment_plan(14_500, 6_000), vec![6_000, 6_000, 2_500]);
        assert_eq!(segment_plan(12_000, 6_000), vec![6_000, 6_000]);
        assert_eq!(segment_plan(0, 6_000), vec![6_000]);
    }

    #[test]
    fn media_playlist_lists_segments() {
        let text = media_playlist(&[6_000, 2_500]);
        assert!(text.starts_with("#EXTM3U\n"));
        assert!(text.contains("#EXT-X-TARGETDURATION:6\n"));
        assert!(text.contains("#EXTINF:6.000,\nseg_00000.ts\n"));
        assert!(text.contains("#EXTINF:2.500,\nseg_00001.ts\n"));
        assert!(text.ends_with("#EXT-X-ENDLIST\n"));
    }

    #[test]
    fn master_orders_by_bandwidth_and_skips_original() {
        let text = master_playlist(&[Quality::P360, Quality::Original, Quality::P720]);
        let p720 = text.find("720p/index.m3u8").unwrap();
        let p360 = text.find("360p/index.m3u8").unwrap();
        assert!(p720 < p360);
        assert!(text.contains("BANDWIDTH=5000000,RESOLUTION=1280x720"));
        assert!(!text.contains("original"));
    }
}
