//! Session state commands: init, observe, show.

use crate::cli::SessionArgs;
use crate::{boot_memory, print_json, runtime};
use keepsake_types::config::MemoryConfig;
use keepsake_types::state::{SessionState, SpatialState};

pub fn cmd_session_init(config: MemoryConfig, session: &SessionArgs) {
    let memory = boot_memory(config);
    let key = session.key();
    match runtime().block_on(memory.start_session(&key)) {
        Ok((state, spatial)) => {
            println!("Session {key} is active.");
            print_session(&state);
            print_spatial(&spatial);
        }
        Err(e) => {
            eprintln!("Failed to start session {key}: {e}");
            std::process::exit(1);
        }
    }
}

pub fn cmd_session_observe(config: MemoryConfig, session: &SessionArgs, message: &str, json: bool) {
    let memory = boot_memory(config);
    let key = session.key();
    let observed = match runtime().block_on(memory.observe_reply(&key, message)) {
        Ok(observed) => observed,
        Err(e) => {
            eprintln!("{e}");
            if e.is_session_missing() {
                eprintln!("  hint: run `keepsake session init` for this session first");
            }
            std::process::exit(1);
        }
    };

    if json {
        print_json(&observed);
        return;
    }
    if observed.session.is_none() && observed.spatial.is_none() {
        println!("No state changes.");
        return;
    }
    if let Some(state) = &observed.session {
        print_session(state);
    }
    if let Some(state) = &observed.spatial {
        print_spatial(state);
    }
}

pub fn cmd_session_show(config: MemoryConfig, session: &SessionArgs, json: bool) {
    let memory = boot_memory(config);
    let key = session.key();
    let (state, spatial) = runtime().block_on(memory.session_snapshot(&key));

    if json {
        print_json(&serde_json::json!({ "session": state, "spatial": spatial }));
        return;
    }
    if state.is_none() && spatial.is_none() {
        println!("Session {key} has not been started.");
        return;
    }
    if let Some(state) = &state {
        print_session(state);
    }
    if let Some(state) = &spatial {
        print_spatial(state);
    }
}

fn print_session(state: &SessionState) {
    let accessories: Vec<&str> = state
        .clothing
        .accessories
        .iter()
        .map(String::as_str)
        .collect();
    println!("Session (updated {}):", state.last_updated.to_rfc3339());
    println!("  activity:    {}", state.current_activity);
    println!("  top:         {}", state.clothing.top);
    println!("  bottom:      {}", state.clothing.bottom);
    println!("  underwear:   {}", state.clothing.underwear);
    println!("  shoes:       {}", state.clothing.shoes);
    if !accessories.is_empty() {
        println!("  accessories: {}", accessories.join(", "));
    }
    println!("  hair:        {}", state.hair_style);
    println!("  makeup:      {}", state.makeup);
    println!("  mood:        {}", state.mood);
    println!("  energy:      {}", state.energy);
}

fn print_spatial(state: &SpatialState) {
    let body = &state.body_position;
    let touching: Vec<&str> = state.proximity.touching.iter().map(String::as_str).collect();
    println!("Spatial (updated {}):", state.last_updated.to_rfc3339());
    println!("  body:        {}", body.whole_body);
    println!("  left hand:   {}", body.left_hand);
    println!("  right hand:  {}", body.right_hand);
    println!("  left foot:   {}", body.left_foot);
    println!("  right foot:  {}", body.right_foot);
    println!("  head:        {}", body.head);
    println!("  torso:       {}", body.torso);
    println!("  distance:    {}", state.proximity.distance_to_user);
    if !touching.is_empty() {
        println!("  touching:    {}", touching.join(", "));
    }
    println!("  facing:      {}", state.proximity.facing);
}
