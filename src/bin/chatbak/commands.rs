use crate::KeyArgs;
use anyhow::{bail, Context, Result};
use chatbak::{
    decode_file, decrypt_raw_file, plan_groups, BackupIndex, ContainerParams, FileCache,
    KeyEncoding, RawKey, Reassembler,
};
use std::fs;
use std::path::{Path, PathBuf};

fn raw_key(args: &KeyArgs) -> Result<RawKey> {
    let encoding = if args.ascii_key {
        KeyEncoding::Ascii
    } else {
        KeyEncoding::Hex
    };
    RawKey::parse(args.key.trim(), encoding).context("backup key rejected")
}

pub fn dump(input: &Path, output: &Path, key: &KeyArgs, params: ContainerParams) -> Result<()> {
    let key = raw_key(key)?;
    let summary = decode_file(input, output, &key, params)
        .with_context(|| format!("failed to decode {}", input.display()))?;
    println!(
        "{} pages, {} bytes written to {}",
        summary.pages,
        summary.bytes_written,
        output.display()
    );
    Ok(())
}

pub fn decrypt(input: &Path, output: Option<&Path>, key: &KeyArgs) -> Result<()> {
    let key = raw_key(key)?;
    let output = output.map_or_else(
        || {
            let mut name = input.as_os_str().to_owned();
            name.push("_Decrypt");
            PathBuf::from(name)
        },
        Path::to_path_buf,
    );

    let data = decrypt_raw_file(input, &key)
        .with_context(|| format!("failed to decrypt {}", input.display()))?;
    fs::write(&output, &data).with_context(|| format!("failed to write {}", output.display()))?;
    tracing::info!(bytes = data.len(), output = %output.display(), "file decrypted");
    Ok(())
}

/// Writes `<out>/<BAK file name>/<map key><ext>` for every resource.
pub fn resources(db: &Path, resource_dir: &Path, key: &KeyArgs, out: &Path) -> Result<()> {
    let key = raw_key(key)?;
    let index =
        BackupIndex::open(db).with_context(|| format!("failed to open {}", db.display()))?;
    let segments = index.file_segments().context("failed to list file segments")?;

    // Output folder per group follows the BAK file of its last chunk.
    let mut folders = std::collections::HashMap::new();
    for segment in &segments {
        folders.insert(segment.map_key, segment.file_name.clone());
    }

    let ranges = segments
        .iter()
        .map(|s| s.to_range(resource_dir))
        .collect::<chatbak::Result<Vec<_>>>()
        .context("invalid file segment")?;
    let groups = plan_groups(ranges);
    tracing::info!(groups = groups.len(), ranges = segments.len(), "reassembling resources");

    let mut cache = FileCache::new();
    let written = Reassembler::new(&key, &mut cache).for_each_group(&groups, |blob| {
        let folder = match folders.get(&blob.group_key()) {
            Some(name) => out.join(name),
            None => out.to_path_buf(),
        };
        fs::create_dir_all(&folder)?;
        let path = folder.join(blob.file_name());
        fs::write(&path, blob.as_bytes())?;
        tracing::debug!(path = %path.display(), len = blob.len(), "wrote resource");
        Ok(())
    });
    cache.drop_all();

    let written = written.context("resource reassembly failed")?;
    println!("{} resources written to {}", written, out.display());
    Ok(())
}

/// Writes `<out>/<media id><ext>` for one media item.
pub fn media(db: &Path, resource_dir: &Path, key: &KeyArgs, id: &str, out: &Path) -> Result<()> {
    let key = raw_key(key)?;
    let index =
        BackupIndex::open(db).with_context(|| format!("failed to open {}", db.display()))?;

    let Some(map_key) = index.media_id(id)? else {
        bail!("media {id} not found in {}", db.display());
    };
    let mut groups = plan_groups(index.media_ranges(map_key, resource_dir)?);
    let Some(group) = groups.pop() else {
        bail!("media {id} has no file segments");
    };

    let mut cache = FileCache::new();
    let blob = Reassembler::new(&key, &mut cache)
        .reassemble_group(&group)
        .with_context(|| format!("failed to reassemble media {id}"))?;

    fs::create_dir_all(out).with_context(|| format!("failed to create {}", out.display()))?;
    let path = out.join(format!("{}{}", id, blob.extension()));
    fs::write(&path, blob.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("{} ({} bytes)", path.display(), blob.len());
    Ok(())
}

/// Lists sessions, largest first, with a grand total.
pub fn sessions(db: &Path, limit: Option<usize>) -> Result<()> {
    let index =
        BackupIndex::open(db).with_context(|| format!("failed to open {}", db.display()))?;
    let sessions = index.sessions().context("failed to list sessions")?;

    let mut total = 0i64;
    for session in &sessions {
        let nick: String = match limit {
            Some(n) => session.nick_name.chars().take(n).collect(),
            None => session.nick_name.clone(),
        };
        println!("{}\t{}\t{}", session.talker, nick, session.total_size);
        total += session.total_size;
    }
    println!("{} sessions, {} bytes", sessions.len(), total);
    Ok(())
}

/// Writes the decrypted message blocks of one talker to
/// `<out>/<talker>/<block index>.bin`.
pub fn chat(
    db: &Path,
    resource_dir: &Path,
    key: &KeyArgs,
    talker: &str,
    out: &Path,
) -> Result<()> {
    let key = raw_key(key)?;
    let index =
        BackupIndex::open(db).with_context(|| format!("failed to open {}", db.display()))?;

    let Some(talker_id) = index.talker_id(talker)? else {
        bail!("talker {talker} not found in {}", db.display());
    };
    let groups = plan_groups(
        index
            .message_ranges(talker_id, resource_dir)
            .with_context(|| format!("invalid message segment for {talker}"))?,
    );
    tracing::info!(talker, talker_id, blocks = groups.len(), "decrypting messages");

    let folder = out.join(talker);
    fs::create_dir_all(&folder)
        .with_context(|| format!("failed to create {}", folder.display()))?;

    let mut cache = FileCache::new();
    let written = Reassembler::new(&key, &mut cache).for_each_group(&groups, |blob| {
        let path = folder.join(format!("{:04}.bin", blob.group_key()));
        fs::write(&path, blob.as_bytes())?;
        tracing::debug!(path = %path.display(), len = blob.len(), "wrote message block");
        Ok(())
    });
    cache.drop_all();

    let written = written.with_context(|| format!("failed to decrypt messages of {talker}"))?;
    println!("{} message blocks written to {}", written, folder.display());
    Ok(())
}
