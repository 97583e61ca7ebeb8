//! End-to-end dispatch scenarios against the in-process mock plugin.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use approx::assert_relative_eq;

use common::{build_engine, build_engine_with, mock_shared, push, CUTOFF_LOWER, CUTOFF_UPPER};
use continuo_plugin::{EventKind, SynthEvent};

const BLOCK: usize = 256;

#[test]
fn one_instance_per_channel_is_the_limit() {
    assert!(common::try_build_engine(16, false).is_ok());
    let err = common::try_build_engine(17, false).unwrap_err();
    assert!(matches!(
        err,
        continuo_engine::Error::TooManyInstances { max: 16 }
    ));
}

#[test]
fn control_slots_start_at_their_defaults() {
    let engine = build_engine(1);
    let shared = engine.shared();
    // Cutoff has no default hint: bounded range not spanning zero -> lower.
    assert_relative_eq!(shared.control_ins[0].get(), CUTOFF_LOWER);
    // Volume declares a middle default over [0, 1].
    assert_relative_eq!(shared.control_ins[1].get(), 0.5);
}

#[test]
fn single_note_reaches_the_plugin_in_order() {
    let mut engine = build_engine(1);
    let shared = engine.shared();
    let mock = mock_shared(&shared.instances[0]);

    push(&engine, SynthEvent::note_on(0, 60, 100));
    engine.process_block(BLOCK);

    {
        let blocks = mock.blocks.lock().unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].len(), 1);
        assert_eq!(blocks[0][0].kind, EventKind::NoteOn);
        assert_eq!(blocks[0][0].data1, 60);
        assert!((blocks[0][0].tick as usize) < BLOCK);
    }
    // Output is live while the note sustains.
    assert!(engine.output(0)[..BLOCK].iter().any(|&s| s != 0.0));

    push(&engine, SynthEvent::note_off(0, 60));
    engine.process_block(BLOCK);

    let blocks = mock.blocks.lock().unwrap();
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[1].len(), 1);
    assert_eq!(blocks[1][0].kind, EventKind::NoteOff);
}

#[test]
fn same_block_events_preserve_ingress_order() {
    let mut engine = build_engine(1);
    let mock = mock_shared(&engine.shared().instances[0]);

    for note in [60, 64, 67] {
        push(&engine, SynthEvent::note_on(0, note, 90));
    }
    engine.process_block(BLOCK);

    let blocks = mock.blocks.lock().unwrap();
    let notes: Vec<u8> = blocks[0].iter().map(|e| e.data1).collect();
    assert_eq!(notes, vec![60, 64, 67]);
}

#[test]
fn events_route_by_channel_only() {
    let mut engine = build_engine(2);
    let shared = engine.shared();
    let first = mock_shared(&shared.instances[0]);
    let second = mock_shared(&shared.instances[1]);

    push(&engine, SynthEvent::note_on(1, 64, 90));
    engine.process_block(BLOCK);

    let first_blocks = first.blocks.lock().unwrap();
    let second_blocks = second.blocks.lock().unwrap();
    assert!(first_blocks[0].is_empty());
    assert_eq!(second_blocks[0].len(), 1);
    assert_eq!(second_blocks[0][0].data1, 64);
}

#[test]
fn unbound_channels_are_discarded() {
    let mut engine = build_engine(1);
    let mock = mock_shared(&engine.shared().instances[0]);

    push(&engine, SynthEvent::note_on(5, 64, 90));
    engine.process_block(BLOCK);

    assert!(mock.blocks.lock().unwrap()[0].is_empty());
}

#[test]
fn mapped_controller_scales_into_the_port_range() {
    let mut engine = build_engine(1);
    let shared = engine.shared();
    let mock = mock_shared(&shared.instances[0]);

    push(&engine, SynthEvent::controller(0, 74, 64));
    engine.process_block(BLOCK);

    let expected = CUTOFF_LOWER + (CUTOFF_UPPER - CUTOFF_LOWER) * 64.0 / 127.0;
    assert_relative_eq!(shared.control_ins[0].get(), expected);
    assert!(shared.port_updated[0].get());
    // A mapped controller is absorbed, not forwarded to the plugin.
    assert!(mock.blocks.lock().unwrap()[0].is_empty());
}

#[test]
fn mapped_controller_is_idempotent() {
    let mut engine = build_engine(1);
    let shared = engine.shared();

    push(&engine, SynthEvent::controller(0, 74, 101));
    engine.process_block(BLOCK);
    let first = shared.control_ins[0].get();

    push(&engine, SynthEvent::controller(0, 74, 101));
    engine.process_block(BLOCK);
    assert_eq!(shared.control_ins[0].get(), first);
}

#[test]
fn unmapped_controllers_are_forwarded() {
    let mut engine = build_engine(1);
    let mock = mock_shared(&engine.shared().instances[0]);

    push(&engine, SynthEvent::controller(0, 1, 42));
    engine.process_block(BLOCK);

    let blocks = mock.blocks.lock().unwrap();
    assert_eq!(blocks[0].len(), 1);
    assert_eq!(blocks[0][0].kind, EventKind::Controller);
    assert_eq!((blocks[0][0].data1, blocks[0][0].data2), (1, 42));
}

#[test]
fn bank_and_program_coalesce_at_the_block_boundary() {
    let mut engine = build_engine(1);
    let shared = engine.shared();
    let instance = &shared.instances[0];
    let mock = mock_shared(instance);

    push(&engine, SynthEvent::controller(0, 0, 1)); // bank MSB
    push(&engine, SynthEvent::controller(0, 32, 3)); // bank LSB
    push(&engine, SynthEvent::program_change(0, 7));
    engine.process_block(BLOCK);

    assert_eq!(instance.program.current_bank.load(Ordering::Acquire), 131);
    assert_eq!(instance.program.current_program.load(Ordering::Acquire), 7);
    assert_eq!(instance.program.pending_bank_msb.load(Ordering::Acquire), -1);
    assert_eq!(instance.program.pending_bank_lsb.load(Ordering::Acquire), -1);
    assert_eq!(instance.program.pending_program.load(Ordering::Acquire), -1);
    assert_eq!(*mock.selected.lock().unwrap().last().unwrap(), (131, 7));
    // Bank select and program change never reach the event sub-buffer.
    assert!(mock.blocks.lock().unwrap()[0].is_empty());
}

#[test]
fn lone_bank_half_preserves_the_other_half() {
    let mut engine = build_engine(1);
    let shared = engine.shared();
    let instance = &shared.instances[0];

    // Establish bank 131 (MSB 1, LSB 3).
    push(&engine, SynthEvent::controller(0, 0, 1));
    push(&engine, SynthEvent::controller(0, 32, 3));
    push(&engine, SynthEvent::program_change(0, 7));
    engine.process_block(BLOCK);

    // LSB only: MSB half of the prior bank survives.
    push(&engine, SynthEvent::controller(0, 32, 5));
    push(&engine, SynthEvent::program_change(0, 2));
    engine.process_block(BLOCK);
    assert_eq!(instance.program.current_bank.load(Ordering::Acquire), 133);
    assert_eq!(instance.program.current_program.load(Ordering::Acquire), 2);

    // MSB only: LSB half survives.
    push(&engine, SynthEvent::controller(0, 0, 2));
    push(&engine, SynthEvent::program_change(0, 4));
    engine.process_block(BLOCK);
    assert_eq!(instance.program.current_bank.load(Ordering::Acquire), 261);
}

#[test]
fn contiguous_instances_share_one_batched_call() {
    let mut engine = build_engine_with(2, true);
    let shared = engine.shared();
    let first = mock_shared(&shared.instances[0]);
    let second = mock_shared(&shared.instances[1]);

    push(&engine, SynthEvent::note_on(0, 60, 100));
    push(&engine, SynthEvent::note_on(1, 62, 100));
    engine.process_block(BLOCK);

    assert_eq!(*first.batch_sizes.lock().unwrap(), vec![2]);
    assert_eq!(*second.batch_sizes.lock().unwrap(), vec![2]);
    assert_eq!(first.blocks.lock().unwrap()[0][0].data1, 60);
    assert_eq!(second.blocks.lock().unwrap()[0][0].data1, 62);
}

#[test]
fn future_events_wait_for_the_next_block() {
    let mut engine = build_engine(1);
    let mock = mock_shared(&engine.shared().instances[0]);

    let mut ev = SynthEvent::note_on(0, 60, 100);
    ev.tick = 0;
    engine.producer().push(continuo_engine::IngressEvent {
        at: std::time::Instant::now() + Duration::from_millis(50),
        ev,
    });
    engine.process_block(BLOCK);
    assert!(mock.blocks.lock().unwrap()[0].is_empty());

    std::thread::sleep(Duration::from_millis(60));
    engine.process_block(BLOCK);
    let blocks = mock.blocks.lock().unwrap();
    assert_eq!(blocks[1].len(), 1);
}

mod osc {
    use super::*;
    use std::net::UdpSocket;

    use continuo_engine::{Engine, EngineShared, Liaison, OscServer};
    use rosc::{OscMessage, OscMidiMessage, OscPacket, OscType};

    fn server_for(engine: &Engine) -> OscServer {
        OscServer::bind(engine.shared(), engine.producer(), None).unwrap()
    }

    fn message(shared: &EngineShared, method: &str, args: Vec<OscType>) -> OscMessage {
        OscMessage {
            addr: format!("/dssi/{}/{method}", shared.instances[0].friendly_name),
            args,
        }
    }

    fn gui_socket() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        socket
    }

    fn recv_message(socket: &UdpSocket) -> OscMessage {
        let mut buf = [0u8; rosc::decoder::MTU];
        let (len, _) = socket.recv_from(&mut buf).unwrap();
        match rosc::decoder::decode_udp(&buf[..len]).unwrap().1 {
            OscPacket::Message(msg) => msg,
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn direct_control_bypasses_the_ring() {
        let mut engine = build_engine(1);
        let shared = engine.shared();
        let server = server_for(&engine);
        let mock = mock_shared(&shared.instances[0]);

        server.handle_message(&message(
            &shared,
            "control",
            vec![OscType::Int(2), OscType::Float(0.75)],
        ));

        // Port 2 is the volume control, global control input 1.
        assert_relative_eq!(shared.control_ins[1].get(), 0.75);
        // Direct writes do not echo back to the front-end.
        assert!(!shared.port_updated[1].get());

        engine.process_block(BLOCK);
        assert!(mock.blocks.lock().unwrap()[0].is_empty());
    }

    #[test]
    fn control_rejects_bad_ports() {
        let engine = build_engine(1);
        let shared = engine.shared();
        let server = server_for(&engine);

        for port in [-1, 99, 0 /* audio out */] {
            server.handle_message(&message(
                &shared,
                "control",
                vec![OscType::Int(port), OscType::Float(9.0)],
            ));
        }
        assert_relative_eq!(shared.control_ins[0].get(), CUTOFF_LOWER);
        assert_relative_eq!(shared.control_ins[1].get(), 0.5);
    }

    #[test]
    fn injected_midi_is_normalized_and_rechanneled() {
        let mut engine = build_engine(1);
        let shared = engine.shared();
        let server = server_for(&engine);
        let mock = mock_shared(&shared.instances[0]);

        // Note-on velocity 0 on the wrong channel.
        server.handle_message(&message(
            &shared,
            "midi",
            vec![OscType::Midi(OscMidiMessage {
                port: 0,
                status: 0x95,
                data1: 60,
                data2: 0,
            })],
        ));
        engine.process_block(BLOCK);

        let blocks = mock.blocks.lock().unwrap();
        assert_eq!(blocks[0].len(), 1);
        assert_eq!(blocks[0][0].kind, EventKind::NoteOff);
        assert_eq!(blocks[0][0].channel, 0);
    }

    #[test]
    fn injected_bank_select_and_program_change_are_rejected() {
        let mut engine = build_engine(1);
        let shared = engine.shared();
        let server = server_for(&engine);
        let mock = mock_shared(&shared.instances[0]);

        for (status, data1, data2) in [(0xB0, 0, 1), (0xB0, 32, 1), (0xC0, 5, 0)] {
            server.handle_message(&message(
                &shared,
                "midi",
                vec![OscType::Midi(OscMidiMessage {
                    port: 0,
                    status,
                    data1,
                    data2,
                })],
            ));
        }
        engine.process_block(BLOCK);

        assert!(mock.blocks.lock().unwrap()[0].is_empty());
        assert_eq!(
            shared.instances[0]
                .program
                .pending_program
                .load(Ordering::Acquire),
            -1
        );
    }

    #[test]
    fn program_request_is_committed_on_the_next_block() {
        let mut engine = build_engine(1);
        let shared = engine.shared();
        let server = server_for(&engine);
        let instance = &shared.instances[0];

        server.handle_message(&message(
            &shared,
            "program",
            vec![OscType::Int(131), OscType::Int(7)],
        ));
        assert_eq!(instance.program.pending_bank_msb.load(Ordering::Acquire), 1);
        assert_eq!(instance.program.pending_bank_lsb.load(Ordering::Acquire), 3);

        engine.process_block(BLOCK);
        assert_eq!(instance.program.current_bank.load(Ordering::Acquire), 131);
        assert_eq!(instance.program.current_program.load(Ordering::Acquire), 7);
    }

    #[test]
    fn configure_reaches_the_plugin_and_rebuilds_programs() {
        let engine = build_engine(1);
        let shared = engine.shared();
        let server = server_for(&engine);
        let instance = &shared.instances[0];
        let mock = mock_shared(instance);

        server.handle_message(&message(
            &shared,
            "configure",
            vec![
                OscType::String("load".into()),
                OscType::String("patch.bin".into()),
            ],
        ));

        assert_eq!(
            *mock.configured.lock().unwrap(),
            vec![("load".to_string(), "patch.bin".to_string())]
        );
        assert_eq!(instance.programs.lock().len(), 2);
    }

    #[test]
    fn update_registers_the_front_end_and_echoes_state() {
        let engine = build_engine(1);
        let shared = engine.shared();
        let server = server_for(&engine);
        let gui = gui_socket();
        let url = format!("osc.udp://127.0.0.1:{}/gui", gui.local_addr().unwrap().port());

        server.handle_message(&message(&shared, "update", vec![OscType::String(url)]));

        // One echo per control input, then the one-time show.
        let mut control_echoes = 0;
        let mut saw_show = false;
        for _ in 0..3 {
            let msg = recv_message(&gui);
            if msg.addr == "/gui/control" {
                control_echoes += 1;
            } else if msg.addr == "/gui/show" {
                saw_show = true;
            }
        }
        assert_eq!(control_echoes, 2);
        assert!(saw_show);
        assert!(shared.instances[0].ui.lock().is_some());
        assert!(shared.instances[0].ui_initial_show_sent.get());
    }

    #[test]
    fn liaison_forwards_port_and_program_updates() {
        let mut engine = build_engine(1);
        let shared = engine.shared();
        let server = server_for(&engine);
        let gui = gui_socket();
        let url = format!("osc.udp://127.0.0.1:{}/gui", gui.local_addr().unwrap().port());
        server.handle_message(&message(&shared, "update", vec![OscType::String(url)]));
        for _ in 0..3 {
            recv_message(&gui); // drain the registration echoes
        }

        let liaison = Liaison::new(shared.clone(), server.socket().try_clone().unwrap());

        // The startup program query left a pending UI program update.
        shared.instances[0].ui_needs_program_update.set(true);
        push(&engine, SynthEvent::controller(0, 74, 64));
        engine.process_block(BLOCK);
        liaison.poll();

        let mut got_program = false;
        let mut got_control = false;
        for _ in 0..2 {
            let msg = recv_message(&gui);
            match msg.addr.as_str() {
                "/gui/program" => got_program = true,
                "/gui/control" => {
                    got_control = true;
                    assert_eq!(msg.args[0], OscType::Int(1));
                }
                other => panic!("unexpected path {other}"),
            }
        }
        assert!(got_program);
        assert!(got_control);
        // Flags are cleared once forwarded.
        assert!(!shared.port_updated[0].get());
        assert!(!shared.instances[0].ui_needs_program_update.get());
    }

    #[test]
    fn exited_instance_goes_quiet_for_the_rest_of_the_session() {
        let mut engine = build_engine_with(2, false);
        let shared = engine.shared();
        let server = server_for(&engine);
        let first = mock_shared(&shared.instances[0]);
        let second = mock_shared(&shared.instances[1]);

        server.handle_message(&OscMessage {
            addr: format!("/dssi/{}/exiting", shared.instances[0].friendly_name),
            args: vec![],
        });
        assert!(shared.instances[0].inactive.get());
        assert_eq!(first.deactivations.load(Ordering::SeqCst), 1);

        // Events for its channel are discarded, its buffers zeroed, and the
        // block call skipped; the sibling instance is untouched.
        push(&engine, SynthEvent::note_on(0, 60, 100));
        push(&engine, SynthEvent::note_on(1, 62, 100));
        engine.process_block(BLOCK);

        assert!(first.blocks.lock().unwrap().is_empty());
        assert!(engine.output(0)[..BLOCK].iter().all(|&s| s == 0.0));
        assert_eq!(second.blocks.lock().unwrap()[0].len(), 1);
        assert!(engine.output(1)[..BLOCK].iter().any(|&s| s != 0.0));
    }

    #[test]
    fn unknown_paths_and_instances_are_ignored() {
        let engine = build_engine(1);
        let shared = engine.shared();
        let server = server_for(&engine);

        server.handle_message(&OscMessage {
            addr: "/dssi/nobody/control".into(),
            args: vec![OscType::Int(1), OscType::Float(0.5)],
        });
        server.handle_message(&OscMessage {
            addr: "/other/root".into(),
            args: vec![],
        });
        // Wrong argument types fall through to the diagnostic handler.
        server.handle_message(&message(
            &shared,
            "control",
            vec![OscType::Float(1.0), OscType::Float(0.5)],
        ));
        assert_relative_eq!(shared.control_ins[1].get(), 0.5);
    }
}
