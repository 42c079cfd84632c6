//! Property-based tests for offer parsing and negotiation.
//!
//! These tests use proptest to check that reserved-bit arbitration and
//! pipeline layout hold for arbitrary offer lists and handshaker sets.

mod harness;

use harness::{MockHandshaker, connection};
use proptest::prelude::*;
use wsext::config::DEFAULT_STAGE_NAME;
use wsext::extensions::rsv::try_claim;
use wsext::{
    ExtensionOffer, ExtensionParam, Frame, HandshakeRequest, HandshakeResponse, Handshakers,
    RsvBits, ServerExtensionHandshaker,
};

const NAMES: [&str; 6] = ["a", "b", "c", "d", "e", "f"];

fn rsv_strategy() -> impl Strategy<Value = RsvBits> {
    (0u8..8).prop_map(RsvBits::from_bits_truncate)
}

fn token_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9!#$%&'*+.^_`|~-]{1,12}"
}

fn param_strategy() -> impl Strategy<Value = ExtensionParam> {
    prop_oneof![
        token_strategy().prop_map(|name| ExtensionParam::flag(name)),
        (token_strategy(), token_strategy()).prop_map(|(k, v)| ExtensionParam::new(k, v)),
        (token_strategy(), "[ -~]{0,12}").prop_map(|(k, v)| ExtensionParam::new(k, v)),
    ]
}

fn offer_strategy() -> impl Strategy<Value = ExtensionOffer> {
    (token_strategy(), prop::collection::vec(param_strategy(), 0..4))
        .prop_map(|(name, params)| ExtensionOffer::with_params(name, params))
}

/// Handshakers for the first `count` names, each claiming its own bits.
fn handshakers_strategy() -> impl Strategy<Value = Vec<RsvBits>> {
    prop::collection::vec(rsv_strategy(), 0..=5)
}

fn build(rsvs: &[RsvBits]) -> Handshakers {
    rsvs.iter()
        .zip(NAMES)
        .map(|(rsv, name)| {
            Box::new(MockHandshaker::new(name, name, *rsv)) as Box<dyn ServerExtensionHandshaker>
        })
        .collect()
}

/// Greedy first-come allocation, written out independently of the negotiator.
fn expected_selection(rsvs: &[RsvBits], offers: &[&str]) -> Vec<String> {
    let mut claimed = 0u8;
    let mut selected = Vec::new();
    for offer in offers {
        let Some(index) = NAMES.iter().position(|n| n == offer) else {
            continue;
        };
        let Some(rsv) = rsvs.get(index) else {
            continue;
        };
        if claimed & rsv.bits() == 0 {
            claimed |= rsv.bits();
            selected.push(offer.to_string());
        }
    }
    selected
}

proptest! {
    // =========================================================================
    // Parsing
    // =========================================================================
    #[test]
    fn test_parse_header_never_panics(header in "\\PC{0,200}") {
        let _ = ExtensionOffer::parse_header(&header);
    }

    #[test]
    fn test_serialized_offers_parse_back(offers in prop::collection::vec(offer_strategy(), 1..5)) {
        let header = wsext::extensions::response_header(&offers).unwrap();
        let parsed = ExtensionOffer::parse_header(&header);
        prop_assert_eq!(parsed, Ok(offers));
    }

    #[test]
    fn test_whitespace_around_delimiters_is_ignored(
        offers in prop::collection::vec(offer_strategy(), 1..4),
        pad in "[ \t]{0,3}"
    ) {
        let header = offers
            .iter()
            .map(|o| {
                let mut entry = format!("{pad}{}{pad}", o.name);
                for p in &o.params {
                    entry.push_str(&format!(";{pad}{p}{pad}"));
                }
                entry
            })
            .collect::<Vec<_>>()
            .join(",");
        prop_assert_eq!(ExtensionOffer::parse_header(&header), Ok(offers));
    }

    // =========================================================================
    // Reserved bits
    // =========================================================================
    #[test]
    fn test_try_claim_all_or_nothing(current in rsv_strategy(), candidate in rsv_strategy()) {
        match try_claim(current, candidate) {
            Some(mask) => {
                prop_assert!(!current.intersects(candidate));
                prop_assert_eq!(mask, current | candidate);
            }
            None => prop_assert!(current.intersects(candidate)),
        }
    }

    // =========================================================================
    // Negotiation
    // =========================================================================
    #[test]
    fn test_selection_is_greedy_in_offer_order(
        rsvs in handshakers_strategy(),
        offers in prop::collection::vec(prop::sample::select(NAMES.to_vec()), 0..8)
    ) {
        let (mut negotiator, mut pipeline) = connection(build(&rsvs));
        let header = offers.join(", ");
        negotiator.handle_request(&mut pipeline, Some(header.as_str())).unwrap();

        let selected: Vec<String> = negotiator.selected().iter().map(|e| e.name.clone()).collect();
        prop_assert_eq!(&selected, &expected_selection(&rsvs, &offers));

        // claimed bits are exactly the union of the winners' bits
        let union = selected
            .iter()
            .filter_map(|name| NAMES.iter().position(|n| n == name))
            .fold(RsvBits::NONE, |acc, i| acc | rsvs[i]);
        prop_assert_eq!(negotiator.claimed_bits(), union);

        // one decoder and one encoder per winner, mirrored around the negotiator
        let names: Vec<&str> = pipeline.names().collect();
        let me = names.iter().position(|n| *n == DEFAULT_STAGE_NAME).unwrap();
        prop_assert_eq!(names.len(), 3 + 2 * selected.len());
        prop_assert!(names[1..me].iter().all(|n| n.contains("-encoder")));
        prop_assert!(names[me + 1..names.len() - 1].iter().all(|n| n.contains("-decoder")));

        // both directions see the transforms in selection order
        let expected_in: String = selected.iter().map(|n| format!("[d:{n}]")).collect();
        let expected_out: String = selected.iter().map(|n| format!("[e:{n}]")).collect();
        let mut inbound = Frame::text("");
        pipeline.process_inbound(&mut inbound).unwrap();
        prop_assert_eq!(inbound.payload(), expected_in.as_bytes());
        let mut outbound = Frame::text("");
        pipeline.process_outbound(&mut outbound).unwrap();
        prop_assert_eq!(outbound.payload(), expected_out.as_bytes());
    }

    #[test]
    fn test_header_present_iff_something_selected(
        rsvs in handshakers_strategy(),
        offers in prop::collection::vec(prop::sample::select(NAMES.to_vec()), 0..6)
    ) {
        let (mut negotiator, mut pipeline) = connection(build(&rsvs));
        let header = offers.join(", ");
        negotiator.handle_request(&mut pipeline, Some(header.as_str())).unwrap();

        let request = HandshakeRequest::parse(&harness::upgrade_request(None)).unwrap();
        let mut response = HandshakeResponse::from_request(&request);
        negotiator.prepare_response(&mut response).unwrap();

        prop_assert_eq!(response.extensions.is_some(), !negotiator.selected().is_empty());
        if let Some(value) = &response.extensions {
            let echoed: Vec<String> = ExtensionOffer::parse_header(value)
                .unwrap()
                .into_iter()
                .map(|o| o.name)
                .collect();
            let selected: Vec<String> = negotiator.selected().iter().map(|e| e.name.clone()).collect();
            prop_assert_eq!(echoed, selected);
        }
    }
}
