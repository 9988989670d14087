//! Dual-chassis portal scenarios: two relays joined by an intra-relay wire.

use pretty_assertions::assert_eq;

use lag_proto::relay::DistributedRelay;
use lag_testkit::{
    converge, masks_partition, portal_pair, relay_masks_exclusive, relay_settled, trace_init,
};
use lag_types::{ConversationMask, SystemId};

const LOWER: u64 = 0x0001_0000_0000_0011;
const UPPER: u64 = 0x0001_0000_0000_0022;
const KEY_A: u16 = 0x300;
const KEY_B: u16 = 0x400;

fn seqs(relay: &DistributedRelay) -> (u32, u32, u32) {
    (
        relay.home_agg_state.sequence,
        relay.home_gw_state.sequence,
        relay.home_gw_preference.sequence,
    )
}

#[test]
fn test_portal_elects_lower_system() {
    trace_init();
    let (mut a, mut b, _wire) = portal_pair(LOWER, KEY_A, UPPER, KEY_B);
    converge(&mut a.engine, &mut b.engine, 100);

    let ra = a.engine.relay(a.relay).unwrap();
    let rb = b.engine.relay(b.relay).unwrap();
    assert!(!ra.dr_solo);
    assert!(!rb.dr_solo);
    assert!(relay_settled(ra));
    assert!(relay_settled(rb));

    // Both chassis speak as the lower system, with its key; the upper
    // chassis drops its own admin key for the winner's.
    for chassis in [&a, &b] {
        let agg = chassis.engine.aggregator(chassis.agg).unwrap();
        assert_eq!(agg.drni_system, SystemId::from_u64(LOWER));
        assert_eq!(agg.drni_key, KEY_A);
        assert_eq!(agg.actor_oper_system, SystemId::from_u64(LOWER));
        assert_eq!(agg.oper_key, KEY_A);
        assert!(!agg.drni_solo);
    }

    // Every conversation has exactly one gateway, and the two relays hold
    // mirrored views of where it is.
    assert!(masks_partition(&ra.home_gateway_mask, &ra.nbor_gateway_mask));
    assert_eq!(ra.home_gateway_mask, rb.nbor_gateway_mask);
    assert_eq!(ra.nbor_gateway_mask, rb.home_gateway_mask);
    assert!(ra.home_gateway_mask.is_full());

    // No shared aggregator algorithm, so each side keeps every
    // conversation on its own aggregator.
    assert!(ra.home_aggregator_mask.is_full());
    assert!(ra.nbor_aggregator_mask.is_empty());
    assert!(rb.home_aggregator_mask.is_full());
    assert!(rb.nbor_aggregator_mask.is_empty());
}

#[test]
fn test_masks_stay_exclusive_through_gateway_withdrawal() {
    trace_init();
    let (mut a, mut b, _wire) = portal_pair(LOWER, KEY_A, UPPER, KEY_B);

    for cycle in 0..140 {
        if cycle == 70 {
            // Withdraw the lower half of the conversation space from the
            // home gateway mid-run.
            let mut keep = ConversationMask::new();
            for cid in 2048..4096u16 {
                keep.set(cid, true);
            }
            a.engine
                .relay_mut(a.relay)
                .unwrap()
                .set_gateway_enable_mask(keep);
        }
        converge(&mut a.engine, &mut b.engine, 1);
        assert!(
            relay_masks_exclusive(a.engine.relay(a.relay).unwrap()),
            "cycle {cycle}"
        );
        assert!(
            relay_masks_exclusive(b.engine.relay(b.relay).unwrap()),
            "cycle {cycle}"
        );
    }

    // The withdrawn conversations moved to the neighbor's gateway.
    let ra = a.engine.relay(a.relay).unwrap();
    let rb = b.engine.relay(b.relay).unwrap();
    assert!(!ra.home_gateway_mask.get(7));
    assert!(ra.nbor_gateway_mask.get(7));
    assert!(ra.home_gateway_mask.get(3000));
    assert!(rb.home_gateway_mask.get(7));
    assert!(masks_partition(&ra.home_gateway_mask, &ra.nbor_gateway_mask));
}

#[test]
fn test_solo_chassis_settles_and_idles() {
    trace_init();
    let (mut a, _b, _wire) = portal_pair(LOWER, KEY_A, UPPER, KEY_B);

    // The neighbor never runs; this chassis must carry the portal alone.
    for _ in 0..80 {
        a.engine.run(false);
        a.engine.timer_tick();
    }

    let ra = a.engine.relay(a.relay).unwrap();
    assert!(ra.dr_solo);
    assert!(ra.gateway_sync_mask.is_full());
    assert!(ra.home_gateway_mask.is_full());
    assert!(ra.home_aggregator_mask.is_full());
    assert!(ra.nbor_gateway_mask.is_empty());
    assert!(ra.nbor_aggregator_mask.is_empty());

    let agg = a.engine.aggregator(a.agg).unwrap();
    assert!(agg.drni_solo);
    assert_eq!(agg.drni_system, SystemId::from_u64(LOWER));
    assert_eq!(agg.drni_key, KEY_A);

    // Without timer ticks or traffic, further cycles change nothing.
    a.engine.run(false);
    a.engine.run(false);
    let snapshot = |relay: &DistributedRelay| {
        (
            relay.rx_state,
            relay.tx_state,
            seqs(relay),
            relay.stats.drcpdu_tx,
        )
    };
    let before = snapshot(a.engine.relay(a.relay).unwrap());
    for _ in 0..5 {
        a.engine.run(false);
    }
    assert_eq!(before, snapshot(a.engine.relay(a.relay).unwrap()));
}

#[test]
fn test_state_sequences_never_regress() {
    trace_init();
    let (mut a, mut b, _wire) = portal_pair(LOWER, KEY_A, UPPER, KEY_B);

    let mut last = seqs(a.engine.relay(a.relay).unwrap());
    for cycle in 0..100 {
        converge(&mut a.engine, &mut b.engine, 1);
        let now = seqs(a.engine.relay(a.relay).unwrap());
        assert!(
            now.0 >= last.0 && now.1 >= last.1 && now.2 >= last.2,
            "cycle {cycle}: {now:?} after {last:?}"
        );
        last = now;
    }
    let ra = a.engine.relay(a.relay).unwrap();
    assert!(relay_settled(ra));
    let before = seqs(ra);

    // One admin change versions exactly the vector it touches.
    let mut enable = ConversationMask::full();
    enable.set(9, false);
    a.engine
        .relay_mut(a.relay)
        .unwrap()
        .set_gateway_enable_mask(enable);
    converge(&mut a.engine, &mut b.engine, 40);

    let ra = a.engine.relay(a.relay).unwrap();
    let after = seqs(ra);
    assert_eq!(after.0, before.0);
    assert_eq!(after.1, before.1 + 1);
    assert_eq!(after.2, before.2);
    assert!(relay_settled(ra));
}

#[test]
fn test_portal_mismatch_keeps_both_solo() {
    trace_init();
    let (mut a, mut b, _wire) = portal_pair(LOWER, KEY_A, UPPER, KEY_B);
    let portal = SystemId::from_u64(0x0001_0000_0000_0050);

    a.engine
        .relay_mut(a.relay)
        .unwrap()
        .set_portal(portal, 0x500);
    converge(&mut a.engine, &mut b.engine, 60);

    let ra = a.engine.relay(a.relay).unwrap();
    let rb = b.engine.relay(b.relay).unwrap();
    assert!(ra.dr_solo);
    assert!(rb.dr_solo);
    assert!(ra.differ_drni);
    assert!(rb.differ_drni);

    // Matching the portal on the second chassis heals the split.
    b.engine
        .relay_mut(b.relay)
        .unwrap()
        .set_portal(portal, 0x500);
    converge(&mut a.engine, &mut b.engine, 60);

    let ra = a.engine.relay(a.relay).unwrap();
    let rb = b.engine.relay(b.relay).unwrap();
    assert!(!ra.dr_solo);
    assert!(!rb.dr_solo);
    assert!(!ra.differ_drni);
    assert!(!rb.differ_drni);
    for chassis in [&a, &b] {
        let agg = chassis.engine.aggregator(chassis.agg).unwrap();
        assert_eq!(agg.drni_system, portal);
        assert_eq!(agg.drni_key, 0x500);
    }
}
