//! Command-line surface.
//!
//! Plugin specifications are positional: an optional `-<N>` sets the
//! repetition count for the library that follows, and `library.so:label`
//! picks a specific plugin from the library.

use anyhow::bail;
use clap::Parser;

use continuo_plugin::PluginSpec;

pub const LABEL_SEP: char = ':';

#[derive(Parser, Debug)]
#[command(
    name = "continuo",
    version,
    about = "Host for hot-loadable synth plugins",
    after_help = "Example: continuo -2 lib1.so -1 lib2.so:fuzzy\n  \
        Run two instances of the first plugin in lib1.so on MIDI channels 0 and 1,\n  \
        and one instance of the \"fuzzy\" plugin in lib2.so on channel 2.\n\n\
        As a special case, when started under a name other than \"continuo\" and\n  \
        that name (plus .so) resolves as a plugin library, the first plugin in it\n  \
        is loaded as the sole instance."
)]
pub struct Args {
    /// Verbose logging
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Connect to a named hardware MIDI input port instead of opening a
    /// virtual one
    #[arg(long)]
    pub midi_port: Option<String>,

    /// UDP port for the OSC control endpoint (default: ephemeral)
    #[arg(long)]
    pub osc_port: Option<u16>,

    /// Plugin specifications: [-<count>] <library>[:<label>] ...
    #[arg(required = true, allow_hyphen_values = true, trailing_var_arg = true)]
    pub plugins: Vec<String>,
}

impl Args {
    /// Arguments for the run-plugin-from-executable-name special case.
    pub fn for_single_library() -> Self {
        Self {
            verbose: false,
            midi_port: None,
            osc_port: None,
            plugins: Vec::new(),
        }
    }
}

/// Expand the positional spec list into per-library plugin specs.
pub fn parse_specs(args: &[String]) -> anyhow::Result<Vec<PluginSpec>> {
    let mut specs = Vec::new();
    let mut reps = 1usize;

    for arg in args {
        if let Some(count) = arg.strip_prefix('-') {
            if let Ok(n) = count.parse::<usize>() {
                if n > 0 {
                    reps = n;
                    continue;
                }
            }
            // Not a usable count; treat the argument as a library name.
        }

        let (library, label) = match arg.split_once(LABEL_SEP) {
            Some((library, label)) => (library.to_string(), Some(label.to_string())),
            None => (arg.clone(), None),
        };
        if library.is_empty() {
            bail!("empty library name in \"{arg}\"");
        }
        specs.push(PluginSpec {
            library,
            label,
            count: reps,
        });
        reps = 1;
    }

    if specs.is_empty() {
        bail!("no plugin specifications given");
    }
    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_counts_and_labels() {
        let specs = parse_specs(&strings(&["-2", "lib1.so", "-1", "lib2.so:fuzzy"])).unwrap();
        assert_eq!(
            specs,
            vec![
                PluginSpec {
                    library: "lib1.so".into(),
                    label: None,
                    count: 2,
                },
                PluginSpec {
                    library: "lib2.so".into(),
                    label: Some("fuzzy".into()),
                    count: 1,
                },
            ]
        );
    }

    #[test]
    fn count_resets_after_each_library() {
        let specs = parse_specs(&strings(&["-3", "a.so", "b.so"])).unwrap();
        assert_eq!(specs[0].count, 3);
        assert_eq!(specs[1].count, 1);
    }

    #[test]
    fn unparseable_count_is_a_library_name() {
        let specs = parse_specs(&strings(&["-0", "a.so"])).unwrap();
        assert_eq!(specs[0].library, "-0");
        assert_eq!(specs[0].count, 1);
        assert_eq!(specs[1].library, "a.so");
    }

    #[test]
    fn empty_list_is_an_error() {
        assert!(parse_specs(&[]).is_err());
        assert!(parse_specs(&strings(&[":label"])).is_err());
    }
}
