//! Full sessions driven through `Game`: scripted AI on both sides, replays
//! and mid-game save/restore.

use std::time::Duration;

use lockstep_core::commander::LocalNetwork;
use lockstep_core::config::GameSpeed;
use lockstep_core::effects::NullEffects;
use lockstep_core::game::Game;
use lockstep_core::replay::{Replay, ReplayPlayer};
use lockstep_core::world::World;
use lockstep_test_utils::fixtures::{skirmish_map, skirmish_settings, skirmish_tech};

fn scripted_game() -> Game {
    let tech = skirmish_tech();
    let map = skirmish_map(&tech);
    let mut game = Game::new(
        skirmish_settings(),
        tech,
        map,
        Box::new(LocalNetwork::new()),
        Box::new(NullEffects),
    )
    .unwrap();
    game.attach_scripted_ai();
    game
}

fn run(game: &mut Game, ticks: u64) {
    for _ in 0..ticks {
        game.tick().unwrap();
    }
}

#[test]
fn scripted_sessions_are_reproducible() {
    let mut a = scripted_game();
    let mut b = scripted_game();
    run(&mut a, 1_200);
    run(&mut b, 1_200);
    assert_eq!(a.world().frame_count(), 1_200);
    assert_eq!(a.world().state_hash(), b.world().state_hash());
}

#[test]
fn scripted_ai_grows_the_economy() {
    let mut game = scripted_game();
    run(&mut game, 1_200);
    for faction in 0..2 {
        assert!(game.world().unit_count(faction).unwrap() > 4);
    }
    assert!(game.outcome().is_none());
}

#[test]
fn recorded_session_survives_bytes_and_verifies() {
    let mut game = scripted_game();
    game.start_recording().unwrap();
    run(&mut game, 500);
    let replay = game.finish_recording().unwrap();
    assert!(replay.command_count() > 0);
    assert_eq!(replay.final_hash, game.world().state_hash());

    let loaded = Replay::from_bytes(&replay.to_bytes().unwrap()).unwrap();
    assert!(loaded
        .matches_content(game.world().tech(), game.world().map())
        .unwrap());
    let mut player = ReplayPlayer::new(loaded).unwrap();
    assert!(player.verify().unwrap());
    assert!(player.is_finished());
    assert_eq!(player.world().state_hash(), game.world().state_hash());
}

#[test]
fn restored_world_keeps_pace_with_the_original() {
    let mut game = scripted_game();
    run(&mut game, 300);
    let bytes = game.world().serialize().unwrap();
    let restored = World::deserialize(&bytes).unwrap();
    assert_eq!(restored.state_hash(), game.world().state_hash());
    assert_eq!(restored.unit_total(), game.world().unit_total());
}

#[test]
fn game_speed_changes_ticks_per_frame_only() {
    let mut normal = scripted_game();
    let mut fast = scripted_game();
    fast.scheduler_mut().set_speed(GameSpeed::Fast);

    let frame = Duration::from_millis(100);
    assert_eq!(normal.run_frame(frame).unwrap(), 4);
    assert_eq!(fast.run_frame(frame).unwrap(), 8);

    normal.run_frame(frame).unwrap();
    assert_eq!(normal.world().frame_count(), fast.world().frame_count());
    assert_eq!(normal.world().state_hash(), fast.world().state_hash());
}

#[test]
fn paused_scheduler_runs_nothing() {
    let mut game = scripted_game();
    game.scheduler_mut().set_paused(true);
    assert_eq!(game.run_frame(Duration::from_secs(1)).unwrap(), 0);
    assert_eq!(game.world().frame_count(), 0);
}
