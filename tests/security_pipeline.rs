//! Security pipeline properties
//!
//! Round trip with every measure off, authenticity soundness for frames
//! built without the key, foreign-key ciphertext, and the rate limiter
//! boundary at the bus admission point. Frames are judged under the
//! configuration they were built with.

mod common;

use canbus_sim::config::{ProcessingCosts, SecurityTuning};
use canbus_sim::error::Rejection;
use canbus_sim::security::{
    KeyMaterial, SecurityConfig, SecurityMeasure, SecurityPipeline, SecurityStore,
};
use canbus_sim::attack_sim::AttackKind;
use canbus_sim::can_bus::SendOutcome;
use canbus_sim::telemetry::{HealthState, SecurityStats};
use canbus_sim::types::{CanId, Frame, Origin, WireFrame, can_ids};
use common::Harness;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn pipeline(seed: u64) -> SecurityPipeline {
    SecurityPipeline::new(
        KeyMaterial::from_seed(seed),
        ProcessingCosts::zero(),
        Arc::new(SecurityStats::default()),
    )
}

prop_compose! {
    fn arb_frame()(
        id in 0u16..=0x7FF,
        payload in prop::collection::vec(any::<u8>(), 1..=8)
    ) -> Frame {
        Frame::new(CanId::Standard(id), payload, Origin::ecu("EngineECU")).unwrap()
    }
}

proptest! {
    #[test]
    fn prop_all_off_round_trip(frame in arb_frame()) {
        let pipeline = pipeline(1);
        let config = SecurityConfig::default();
        let mut store = SecurityStore::new(&SecurityTuning::default());

        let wire = pipeline.protect(&frame, &config).unwrap();
        prop_assert!(wire.envelope.is_empty());
        let opened = pipeline.unprotect(&wire, &config, &mut store, Instant::now()).unwrap();
        prop_assert_eq!(opened.frame, frame);
        prop_assert!(!opened.anomalous);
    }

    #[test]
    fn prop_all_on_round_trip(frame in arb_frame()) {
        let pipeline = pipeline(1);
        let config = SecurityConfig {
            encryption: true,
            authentication: true,
            ..SecurityConfig::default()
        };

        let wire = pipeline.protect(&frame, &config).unwrap();
        prop_assert_ne!(&wire.payload, &frame.payload().to_vec());
        let opened = pipeline.verify(&wire, &config).unwrap();
        prop_assert_eq!(opened.frame.payload(), frame.payload());
    }

    #[test]
    fn prop_keyless_frames_fail_authentication(
        id in 0u16..=0x7FF,
        payload in prop::collection::vec(any::<u8>(), 1..=8),
        forged in prop::option::of(prop::array::uniform32(any::<u8>()))
    ) {
        let pipeline = pipeline(1);
        let config = SecurityConfig::only(SecurityMeasure::Authentication);
        let mut wire = WireFrame::raw(
            CanId::Standard(id),
            payload,
            Origin::ecu("Forger"),
        );
        wire.envelope.mac = forged;

        prop_assert_eq!(pipeline.verify(&wire, &config).unwrap_err(), Rejection::InvalidMac);
    }
}

#[test]
fn test_foreign_key_ciphertext_is_rejected() {
    let config = SecurityConfig::only(SecurityMeasure::Encryption);
    let frame = Frame::new(can_ids::BRAKE_PRESSURE, vec![42], Origin::ecu("BrakeECU")).unwrap();
    let wire = pipeline(1).protect(&frame, &config).unwrap();

    assert_eq!(pipeline(2).verify(&wire, &config).unwrap_err(), Rejection::InvalidEncryption);
}

#[test]
fn test_tampered_ciphertext_is_rejected() {
    let config = SecurityConfig::only(SecurityMeasure::Encryption);
    let pipeline = pipeline(1);
    let frame = Frame::new(can_ids::BRAKE_PRESSURE, vec![42], Origin::ecu("BrakeECU")).unwrap();
    let mut wire = pipeline.protect(&frame, &config).unwrap();
    wire.payload[0] ^= 0x01;

    assert_eq!(pipeline.verify(&wire, &config).unwrap_err(), Rejection::InvalidEncryption);
}

#[test]
fn test_rate_limiter_boundary_at_admission() {
    let tuning = SecurityTuning {
        rate_limit_threshold: 20,
        ..SecurityTuning::default()
    };
    let harness = Harness::with_tuning(SecurityConfig::only(SecurityMeasure::RateLimiting), tuning);
    let t0 = Instant::now();

    for i in 0..20u32 {
        let wire = harness.legit("EngineECU", can_ids::ENGINE_RPM, vec![0, i as u8]);
        assert!(harness.bus.request_send(wire, t0 + Duration::from_millis(i as u64)).is_queued());
    }
    let wire = harness.legit("EngineECU", can_ids::ENGINE_RPM, vec![0, 20]);
    assert_eq!(
        harness.bus.request_send(wire, t0 + Duration::from_millis(20)),
        SendOutcome::Rejected(Rejection::RateExceeded)
    );

    // Other identifiers have their own window
    let wire = harness.legit("BrakeECU", can_ids::BRAKE_PRESSURE, vec![1]);
    assert!(harness.bus.request_send(wire, t0 + Duration::from_millis(20)).is_queued());

    // Oldest accepted send has left the window
    let wire = harness.legit("EngineECU", can_ids::ENGINE_RPM, vec![0, 21]);
    assert!(harness.bus.request_send(wire, t0 + Duration::from_millis(1_001)).is_queued());

    assert_eq!(harness.monitor.stats().snapshot().rate_limit_violations, 1);
}

#[test]
fn test_disabled_rate_limiter_records_nothing() {
    let harness = Harness::new(SecurityConfig::default());
    let t0 = Instant::now();

    // Well over the threshold while the measure is off
    for i in 0..100u64 {
        let wire = harness.legit("EngineECU", can_ids::ENGINE_RPM, vec![0, 1]);
        assert!(harness.bus.request_send(wire, t0 + Duration::from_micros(i * 10)).is_queued());
    }

    harness.security.set(SecurityMeasure::RateLimiting, true);
    let wire = harness.legit("EngineECU", can_ids::ENGINE_RPM, vec![0, 1]);
    assert!(harness.bus.request_send(wire, t0 + Duration::from_millis(2)).is_queued());
}

#[test]
fn test_in_flight_frame_keeps_its_envelope() {
    let harness = Harness::new(SecurityConfig::only(SecurityMeasure::Authentication));
    let mut rx = harness.bus.subscribe("TransmissionECU", &[can_ids::BRAKE_PRESSURE]);
    let t0 = Instant::now();

    // Occupy the medium so the authenticated frame waits in the queue
    let blocker = harness.legit("EngineECU", can_ids::HIGHEST_PRIORITY, vec![0; 8]);
    assert!(harness.bus.request_send(blocker, t0).is_queued());
    let wire = harness.legit("BrakeECU", can_ids::BRAKE_PRESSURE, vec![7]);
    assert!(harness.bus.request_send(wire, t0).is_queued());

    // Switching authentication off does not affect the frame already admitted
    harness.security.set(SecurityMeasure::Authentication, false);
    harness.bus.pump(t0 + Duration::from_millis(5));

    let delivery = rx.try_recv().unwrap();
    assert_eq!(delivery.frame.payload(), &[7]);
}

#[test]
fn test_frame_built_before_toggle_is_checked_as_built() {
    let harness = Harness::new(SecurityConfig::default());
    let mut rx = harness.bus.subscribe("EngineECU", &[can_ids::BRAKE_PRESSURE]);
    let t0 = Instant::now();

    let wire = harness.legit("BrakeECU", can_ids::BRAKE_PRESSURE, vec![9]);
    harness.security.set(SecurityMeasure::Authentication, true);
    harness.security.set(SecurityMeasure::Encryption, true);

    assert!(harness.bus.request_send(wire, t0).is_queued());
    harness.bus.pump(t0 + Duration::from_millis(5));

    let delivery = rx.try_recv().unwrap();
    assert_eq!(delivery.frame.payload(), &[9]);
    assert_eq!(harness.bus.stats(t0).blocked, 0);
    assert_eq!(harness.monitor.health("BrakeECU", t0), Some(HealthState::Healthy));
}

#[test]
fn test_attacker_copy_is_checked_under_current_configuration() {
    let harness = Harness::new(SecurityConfig::default());
    let counters = harness.session(9);
    let t0 = Instant::now();

    let wire = harness.legit("BrakeECU", can_ids::BRAKE_PRESSURE, vec![9]);
    harness.security.set(SecurityMeasure::Authentication, true);

    let forged = wire.with_origin(Origin::Attacker {
        kind: AttackKind::Spoof,
        session: 9,
    });
    assert_eq!(
        harness.attack(&counters, forged, t0),
        SendOutcome::Rejected(Rejection::InvalidMac)
    );
    assert_eq!(counters.snapshot().blocked, 1);
}
