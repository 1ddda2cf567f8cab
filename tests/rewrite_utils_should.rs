use api::server::utils::rewrite_utils::{
    PassThroughMinter, ProxyUrlMinter, rewrite_m3u8, rewrite_mpd, rewrite_vtt, resolve_reference,
};
use url::Url;

fn base() -> Url {
    Url::parse("https://cdn.example/a/master.m3u8").unwrap()
}

fn minter() -> PassThroughMinter {
    PassThroughMinter {
        referer: Some("https://player.example/watch".to_string()),
    }
}

fn minter_without_referer() -> PassThroughMinter {
    PassThroughMinter { referer: None }
}

// --- m3u8 ---

#[test]
fn master_playlist_variant_becomes_proxy_url() {
    let body = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=800000\nlow/index.m3u8\n";

    let out = rewrite_m3u8(body, &base(), &minter()).unwrap();
    let lines: Vec<&str> = out.split('\n').collect();

    assert_eq!(
        lines[2],
        "/m3u8?url=https%3A%2F%2Fcdn.example%2Fa%2Flow%2Findex.m3u8&ref=https%3A%2F%2Fplayer.example%2Fwatch"
    );
}

#[test]
fn comment_lines_without_uri_are_preserved_verbatim_at_the_same_index() {
    let body = "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:6\n#EXTINF:5.96,\nseg-001.ts\n#EXT-X-ENDLIST";

    let out = rewrite_m3u8(body, &base(), &minter()).unwrap();
    let in_lines: Vec<&str> = body.split('\n').collect();
    let out_lines: Vec<&str> = out.split('\n').collect();

    for (index, line) in in_lines.iter().enumerate() {
        if line.starts_with('#') && !line.contains("URI=\"") {
            assert_eq!(out_lines[index], *line, "directive moved or changed at line {index}");
        }
    }
}

#[test]
fn line_count_is_preserved() {
    let body = "#EXTM3U\n\n#EXTINF:6.0,\nseg-001.ts\n\nseg-002.ts\n";

    let out = rewrite_m3u8(body, &base(), &minter()).unwrap();

    assert_eq!(body.split('\n').count(), out.split('\n').count());
}

#[test]
fn no_uri_line_escapes_the_proxy() {
    let body = concat!(
        "#EXTM3U\n",
        "https://other-cdn.example/abs/seg.ts\n",
        "//host.example/proto/seg.ts\n",
        "/root/seg.ts\n",
        "relative/seg.ts\n",
    );

    let out = rewrite_m3u8(body, &base(), &minter()).unwrap();

    for line in out.split('\n') {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        assert!(
            line.starts_with("/m3u8?url="),
            "line escaped the proxy: {line}"
        );
    }
}

#[test]
fn referer_survives_an_encode_decode_round_trip() {
    let body = "#EXTM3U\nseg-001.ts\n";
    let referer = "https://player.example/watch?id=42&lang=en";

    let out = rewrite_m3u8(
        body,
        &base(),
        &PassThroughMinter {
            referer: Some(referer.to_string()),
        },
    )
    .unwrap();

    let uri_line = out.split('\n').nth(1).unwrap();
    let encoded_ref = uri_line.split("&ref=").nth(1).unwrap();
    assert_eq!(urlencoding::decode(encoded_ref).unwrap(), referer);
}

#[test]
fn resolution_covers_all_reference_shapes() {
    let base = base();

    for (href, expected) in [
        ("https://abs.example/x/seg.ts", "https://abs.example/x/seg.ts"),
        ("//proto.example/x/seg.ts", "https://proto.example/x/seg.ts"),
        ("/root/seg.ts", "https://cdn.example/root/seg.ts"),
        ("relative/seg.ts", "https://cdn.example/a/relative/seg.ts"),
        ("../up/seg.ts", "https://cdn.example/up/seg.ts"),
    ] {
        let resolved = resolve_reference(&base, href).unwrap();
        assert_eq!(resolved.as_str(), expected, "href {href}");
    }
}

#[test]
fn url_param_decodes_back_to_the_resolved_reference() {
    let body = "#EXTM3U\nlow/index.m3u8\n";

    let out = rewrite_m3u8(body, &base(), &minter_without_referer()).unwrap();
    let uri_line = out.split('\n').nth(1).unwrap();

    let encoded = uri_line.strip_prefix("/m3u8?url=").unwrap();
    assert_eq!(
        urlencoding::decode(encoded).unwrap(),
        "https://cdn.example/a/low/index.m3u8"
    );
}

#[test]
fn ext_x_key_uri_is_rewritten_in_place() {
    let body = "#EXTM3U\n#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\",IV=0x0\nseg-001.ts\n";

    let out = rewrite_m3u8(body, &base(), &minter()).unwrap();
    let key_line = out.split('\n').nth(1).unwrap();

    // directive structure survives, only the quoted value changed
    assert!(key_line.starts_with("#EXT-X-KEY:METHOD=AES-128,URI=\""));
    assert!(key_line.ends_with("\",IV=0x0"));
    assert!(key_line.contains(&urlencoding::encode("https://cdn.example/a/key.bin").into_owned()));
}

#[test]
fn ext_x_map_and_media_uris_are_rewritten() {
    let body = concat!(
        "#EXTM3U\n",
        "#EXT-X-MAP:URI=\"init.mp4\"\n",
        "#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",URI=\"audio/index.m3u8\"\n",
    );

    let out = rewrite_m3u8(body, &base(), &minter()).unwrap();
    let lines: Vec<&str> = out.split('\n').collect();

    assert!(lines[1].contains(&urlencoding::encode("https://cdn.example/a/init.mp4").into_owned()));
    assert!(lines[2].starts_with("#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",URI=\""));
    assert!(
        lines[2].contains(&urlencoding::encode("https://cdn.example/a/audio/index.m3u8").into_owned())
    );
}

#[test]
fn crlf_line_endings_survive() {
    let body = "#EXTM3U\r\nseg-001.ts\r\n";

    let out = rewrite_m3u8(body, &base(), &minter()).unwrap();

    assert!(out.split('\n').next().unwrap().ends_with('\r'));
    assert!(out.split('\n').nth(1).unwrap().ends_with('\r'));
}

#[test]
fn empty_playlist_is_refused() {
    assert!(rewrite_m3u8("", &base(), &minter()).is_err());
    assert!(rewrite_m3u8("   \n  ", &base(), &minter()).is_err());
}

// --- vtt ---

#[test]
fn vtt_cues_survive_and_urls_are_proxied() {
    let body = concat!(
        "WEBVTT\n",
        "\n",
        "00:00:00.000 --> 00:00:04.000\n",
        "first cue\n",
        "\n",
        "NOTE thumbnail https://cdn.example/a/thumb.jpg\n",
    );

    let base = Url::parse("https://cdn.example/a/subs.vtt").unwrap();
    let out = rewrite_vtt(body, &base, &minter()).unwrap();

    assert_eq!(body.split('\n').count(), out.split('\n').count());
    assert!(out.contains("00:00:00.000 --> 00:00:04.000"));
    assert!(out.contains("first cue"));
    assert!(out.contains("/m3u8?url=https%3A%2F%2Fcdn.example%2Fa%2Fthumb.jpg"));
    assert!(!out.contains("NOTE thumbnail https://cdn.example"));
}

#[test]
fn vtt_relative_references_are_resolved() {
    let body = "WEBVTT\n\nNOTE sprite ./sprites/s1.png\n";
    let base = Url::parse("https://cdn.example/a/subs.vtt").unwrap();

    let out = rewrite_vtt(body, &base, &minter_without_referer()).unwrap();

    assert!(out.contains("/m3u8?url=https%3A%2F%2Fcdn.example%2Fa%2Fsprites%2Fs1.png"));
}

// --- mpd ---

#[test]
fn mpd_base_url_and_source_urls_are_rewritten() {
    let body = concat!(
        r#"<?xml version="1.0" encoding="UTF-8"?>"#,
        r#"<MPD type="static"><Period>"#,
        r#"<BaseURL>https://cdn.example/dash/</BaseURL>"#,
        r#"<SegmentList><Initialization sourceURL="init.mp4"/>"#,
        r#"<SegmentURL media="seg-1.m4s"/></SegmentList>"#,
        r#"</Period></MPD>"#,
    );

    let manifest_url = Url::parse("https://cdn.example/dash/manifest.mpd").unwrap();
    let out = rewrite_mpd(body, &manifest_url, &minter_without_referer()).unwrap();

    assert!(out.contains("/m3u8?url=https%3A%2F%2Fcdn.example%2Fdash%2F</BaseURL>"));
    assert!(out.contains("sourceURL=\"/m3u8?url=https%3A%2F%2Fcdn.example%2Fdash%2Finit.mp4\""));
    assert!(out.contains(&format!(
        "media=\"/m3u8?url={}\"",
        urlencoding::encode("https://cdn.example/dash/seg-1.m4s")
    )));
}

#[test]
fn mpd_templates_survive_unchanged() {
    let body = concat!(
        r#"<MPD><Period><AdaptationSet>"#,
        r#"<SegmentTemplate media="chunk-$Number$.m4s" initialization="init-$RepresentationID$.mp4" duration="4"/>"#,
        r#"</AdaptationSet></Period></MPD>"#,
    );

    let manifest_url = Url::parse("https://cdn.example/dash/manifest.mpd").unwrap();
    let out = rewrite_mpd(body, &manifest_url, &minter_without_referer()).unwrap();

    // placeholders expand client-side, they must come through untouched
    assert!(out.contains("$Number$"));
    assert!(out.contains("$RepresentationID$"));
    // the duration attribute carries no url and stays put
    assert!(out.contains(r#"duration="4""#));
}

#[test]
fn empty_manifest_is_refused() {
    let manifest_url = Url::parse("https://cdn.example/dash/manifest.mpd").unwrap();
    assert!(rewrite_mpd("", &manifest_url, &minter()).is_err());
    assert!(rewrite_vtt("", &manifest_url, &minter()).is_err());
}

// --- minters ---

#[test]
fn pass_through_minter_omits_missing_referer() {
    let minted = minter_without_referer().mint(
        "https://cdn.example/seg.ts",
        api::server::utils::classify_utils::ResourceKind::MediaSegment,
    );

    assert!(minted.starts_with("/m3u8?url="));
    assert!(!minted.contains("&ref="));
}
