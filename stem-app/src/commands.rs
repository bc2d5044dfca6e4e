//! Command definitions and parsing for the stems prompt

/// Commands accepted at the prompt
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // Library
    Songs,
    Download(String),
    Delete(String),
    Storage,

    // Engine
    Load(String),
    Preload(String),
    Evict(String),
    Play,
    Pause,
    Stop,
    Toggle,
    Seek(f64),
    Volume(String, f32),
    Mute(String, bool),
    Solo(String, bool),
    Reset,
    Status,
    Watch(f64),

    // Setlists
    Setlists,
    SetlistNew { name: String, slugs: Vec<String> },
    SetlistOpen(String),
    SetlistAdd { id: String, slugs: Vec<String> },
    SetlistRemove { id: String, slug: String },
    SetlistRename { id: String, name: String },
    SetlistDelete(String),
    Next,
    Prev,

    // System
    Help,
    Quit,
}

pub const HELP: &str = "\
songs                      list the catalog (* downloaded, + decoded)
download <slug>            download every track of a song
delete <slug>              remove a downloaded song
storage                    disk used by downloaded songs
load <slug>                decode (if needed) and activate a song
preload <slug>             decode a song in the background
evict <slug>               drop a decoded song from memory
play | pause | stop        transport
toggle                     play/pause
seek <secs>                jump to a position
vol <track> <0..1>         track volume
mute|unmute <track>        track mute
solo|unsolo <track>        track solo
reset                      all tracks to full volume, no mute/solo
status                     position, state and track mix
watch <secs>               print the position while playing
setlists                   list saved setlists
setlist new <name> <slug>...
setlist open <id>          load the first song, preload the rest
setlist add <id> <slug>...   append songs
setlist remove <id> <slug> drop a song
setlist rename <id> <name>
setlist delete <id>
next | prev                move through the open setlist
help                       this text
quit";

/// Parse one prompt line. `None` for unknown or malformed input.
pub fn parse_command(line: &str) -> Option<Command> {
    let args = split_args(line);
    let (head, rest) = args.split_first()?;

    match (head.as_str(), rest) {
        ("q" | "quit" | "exit", []) => Some(Command::Quit),
        ("help" | "?", []) => Some(Command::Help),

        ("songs" | "ls", []) => Some(Command::Songs),
        ("download" | "dl", [slug]) => Some(Command::Download(slug.clone())),
        ("delete", [slug]) => Some(Command::Delete(slug.clone())),
        ("storage", []) => Some(Command::Storage),

        ("load", [slug]) => Some(Command::Load(slug.clone())),
        ("preload", [slug]) => Some(Command::Preload(slug.clone())),
        ("evict", [slug]) => Some(Command::Evict(slug.clone())),
        ("play", []) => Some(Command::Play),
        ("pause", []) => Some(Command::Pause),
        ("stop", []) => Some(Command::Stop),
        ("toggle" | "space", []) => Some(Command::Toggle),
        ("seek", [secs]) => parse_seconds(secs).map(Command::Seek),
        ("vol" | "volume", [track, level]) => {
            let level: f32 = level.parse().ok()?;
            level
                .is_finite()
                .then(|| Command::Volume(track.clone(), level))
        }
        ("mute", [track]) => Some(Command::Mute(track.clone(), true)),
        ("unmute", [track]) => Some(Command::Mute(track.clone(), false)),
        ("solo", [track]) => Some(Command::Solo(track.clone(), true)),
        ("unsolo", [track]) => Some(Command::Solo(track.clone(), false)),
        ("reset", []) => Some(Command::Reset),
        ("status" | "st", []) => Some(Command::Status),
        ("watch", [secs]) => parse_seconds(secs).map(Command::Watch),

        ("setlists", []) => Some(Command::Setlists),
        ("setlist", [action, args @ ..]) => parse_setlist(action, args),
        ("next", []) => Some(Command::Next),
        ("prev", []) => Some(Command::Prev),

        _ => None,
    }
}

fn parse_setlist(action: &str, args: &[String]) -> Option<Command> {
    match (action, args) {
        ("new", [name, slugs @ ..]) if !name.is_empty() => Some(Command::SetlistNew {
            name: name.clone(),
            slugs: slugs.to_vec(),
        }),
        ("open", [id]) => Some(Command::SetlistOpen(id.clone())),
        ("delete", [id]) => Some(Command::SetlistDelete(id.clone())),
        ("add", [id, slugs @ ..]) if !slugs.is_empty() => Some(Command::SetlistAdd {
            id: id.clone(),
            slugs: slugs.to_vec(),
        }),
        ("remove", [id, slug]) => Some(Command::SetlistRemove {
            id: id.clone(),
            slug: slug.clone(),
        }),
        ("rename", [id, name]) if !name.is_empty() => Some(Command::SetlistRename {
            id: id.clone(),
            name: name.clone(),
        }),
        _ => None,
    }
}

/// Seconds as `90`, `90.5` or `m:ss`
fn parse_seconds(input: &str) -> Option<f64> {
    let secs = match input.split_once(':') {
        Some((mins, secs)) => mins.parse::<u32>().ok()? as f64 * 60.0 + secs.parse::<f64>().ok()?,
        None => input.parse::<f64>().ok()?,
    };
    (secs.is_finite() && secs >= 0.0).then_some(secs)
}

/// Split on whitespace, keeping single- or double-quoted runs together
fn split_args(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_arg = false;

    for c in line.trim().chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_arg = true;
            }
            None if c.is_whitespace() => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            None => {
                current.push(c);
                in_arg = true;
            }
        }
    }
    if in_arg {
        args.push(current);
    }

    args
}

/// Format seconds as m:ss.t
pub fn format_time(secs: f64) -> String {
    let secs = secs.max(0.0);
    let mins = (secs / 60.0).floor() as u64;
    let rest = secs - mins as f64 * 60.0;
    format!("{}:{:04.1}", mins, rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_commands() {
        assert_eq!(parse_command("play"), Some(Command::Play));
        assert_eq!(parse_command("  pause "), Some(Command::Pause));
        assert_eq!(parse_command("q"), Some(Command::Quit));
        assert_eq!(parse_command("songs"), Some(Command::Songs));
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("dance"), None);
    }

    #[test]
    fn test_arity_is_checked() {
        assert_eq!(parse_command("play now"), None);
        assert_eq!(parse_command("load"), None);
        assert_eq!(parse_command("vol bass"), None);
    }

    #[test]
    fn test_seek_formats() {
        assert_eq!(parse_command("seek 12.5"), Some(Command::Seek(12.5)));
        assert_eq!(parse_command("seek 1:30"), Some(Command::Seek(90.0)));
        assert_eq!(parse_command("seek -4"), None);
        assert_eq!(parse_command("seek soon"), None);
    }

    #[test]
    fn test_track_commands() {
        assert_eq!(
            parse_command("vol bass.mp3 0.4"),
            Some(Command::Volume("bass.mp3".into(), 0.4))
        );
        assert_eq!(
            parse_command("unmute vox.mp3"),
            Some(Command::Mute("vox.mp3".into(), false))
        );
        assert_eq!(
            parse_command("solo 'lead vox.mp3'"),
            Some(Command::Solo("lead vox.mp3".into(), true))
        );
        assert_eq!(parse_command("vol bass.mp3 NaN"), None);
    }

    #[test]
    fn test_setlist_commands() {
        assert_eq!(
            parse_command("setlist new \"Sunday AM\" intro-song way-maker"),
            Some(Command::SetlistNew {
                name: "Sunday AM".into(),
                slugs: vec!["intro-song".into(), "way-maker".into()],
            })
        );
        assert_eq!(
            parse_command("setlist open 18f2a"),
            Some(Command::SetlistOpen("18f2a".into()))
        );
        assert_eq!(
            parse_command("setlist add 18f2a way-maker goodness"),
            Some(Command::SetlistAdd {
                id: "18f2a".into(),
                slugs: vec!["way-maker".into(), "goodness".into()],
            })
        );
        assert_eq!(
            parse_command("setlist remove 18f2a way-maker"),
            Some(Command::SetlistRemove {
                id: "18f2a".into(),
                slug: "way-maker".into(),
            })
        );
        assert_eq!(
            parse_command("setlist rename 18f2a 'Sunday PM'"),
            Some(Command::SetlistRename {
                id: "18f2a".into(),
                name: "Sunday PM".into(),
            })
        );
        assert_eq!(parse_command("setlist add 18f2a"), None);
        assert_eq!(parse_command("setlist rename x"), None);
        assert_eq!(parse_command("setlist new"), None);
    }

    #[test]
    fn test_split_args_quotes() {
        assert_eq!(split_args("a 'b c' \"d\""), vec!["a", "b c", "d"]);
        assert_eq!(split_args("x ''"), vec!["x", ""]);
        assert!(split_args("   ").is_empty());
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0.0), "0:00.0");
        assert_eq!(format_time(75.3), "1:15.3");
        assert_eq!(format_time(-3.0), "0:00.0");
    }
}
