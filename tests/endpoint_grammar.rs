use oracle_provider::endpoint::{decode_endpoint_bytes, parse, ApiSubtype, EndpointKind};
use oracle_provider::utils::{decimal_to_wei, ether_to_wei};
use rstest::rstest;

fn word(text: &str) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[..text.len()].copy_from_slice(text.as_bytes());
    word
}

#[rstest]
#[case("BTC.USD.PR.AVG")]
#[case("ETH.USDT.AD.5")]
#[case("LINK.ETH.PR.AVC.2H.5")]
#[case("BNB.BUSD.PR.LAT")]
fn on_chain_payload_parses_like_its_text(#[case] text: &str) {
    let decoded = decode_endpoint_bytes(&word(text));
    assert_eq!(decoded, text);

    let endpoint = parse(&decoded).unwrap();
    assert_eq!(endpoint.is_adhoc(), text.split('.').nth(2) == Some("AD"));

    // The normalized form parses back to the same endpoint.
    assert_eq!(parse(&endpoint.to_string()).unwrap(), endpoint);
}

#[rstest]
#[case("BTC.USD.PR.AVG", "average/1h")]
#[case("BTC.USD.PR.AVI.30M", "average/interquartile/30m")]
#[case("BTC.USD.PR.AVP.48H", "average/percentile/48h")]
#[case("BTC.USD.PR.AVC.6H.oops", "average/chauvenet/6h/3")]
#[case("BTC.USD.PR.AVC.6H.7", "average/chauvenet/6h/7")]
#[case("BTC.USD.PR.LAT", "latest")]
fn api_endpoints_map_to_uri_suffixes(#[case] text: &str, #[case] suffix: &str) {
    assert_eq!(parse(text).unwrap().uri_suffix().as_deref(), Some(suffix));
}

#[test]
fn adhoc_history_is_clamped_to_an_hour() {
    let endpoint = parse("eth.usdt.ad.90").unwrap();
    assert_eq!(endpoint.base, "ETH");
    assert_eq!(endpoint.target, "USDT");
    assert_eq!(endpoint.kind, EndpointKind::Adhoc { minutes: 60 });
    assert!(endpoint.uri_suffix().is_none());
}

#[test]
fn unknown_window_falls_back_to_one_hour() {
    let endpoint = parse("BTC.USD.PR.AVG.3D").unwrap();
    assert!(matches!(
        endpoint.kind,
        EndpointKind::Api {
            subtype: ApiSubtype::Avg,
            window: "1H",
            ..
        }
    ));
}

#[rstest]
#[case(0.1, "100000000000000000")]
#[case(1999.99, "1999990000000000000000")]
#[case(0.000000000000000001, "1")]
#[case(0.0000000000000000009, "0")]
#[case(1e21, "1000000000000000000000000000000000000000")]
fn ether_to_wei_truncates_literal_fixtures(#[case] ether: f64, #[case] wei: &str) {
    assert_eq!(ether_to_wei(ether).unwrap().to_string(), wei);
}

#[test]
fn api_prices_are_scaled_from_their_decimal_text() {
    assert_eq!(
        decimal_to_wei("27123.456789").unwrap().to_string(),
        "27123456789000000000000"
    );
    assert!(decimal_to_wei("n/a").is_err());
    assert!(ether_to_wei(f64::NAN).is_none());
}
