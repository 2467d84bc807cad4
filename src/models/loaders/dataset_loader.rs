use crate::error::{AppError, FileError};
use crate::models::task::Task;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

const IMAGE_CANDIDATES: [&str; 2] = ["input.jpg", "input.png"];
const PROMPT_FILE: &str = "prompt.txt";

/// 从单个数据目录构造任务
///
/// 目录缺少源图或提示词时返回 `Ok(None)`。
pub async fn load_entry(id: u64, dir: &Path) -> Result<Option<Task>> {
    let mut source = None;
    for candidate in IMAGE_CANDIDATES {
        let path = dir.join(candidate);
        if fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false) {
            source = Some(path);
            break;
        }
    }
    let Some(source) = source else {
        return Ok(None);
    };

    let prompt_path = dir.join(PROMPT_FILE);
    if !fs::metadata(&prompt_path).await.map(|m| m.is_file()).unwrap_or(false) {
        return Ok(None);
    }
    let prompt = fs::read_to_string(&prompt_path)
        .await
        .with_context(|| format!("无法读取提示词: {}", prompt_path.display()))?;
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Ok(None);
    }

    let dimensions = image::image_dimensions(&source)
        .with_context(|| format!("无法读取图片尺寸: {}", source.display()))?;

    let name = dir
        .file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();

    Ok(Some(Task::new(id, name, source, dimensions, prompt)))
}

/// 从数据集根目录加载所有任务
///
/// 子目录按名字排序后依次编号（从 1 开始），不完整的目录跳过。
pub async fn load_dataset(root: &Path) -> Result<Vec<Task>> {
    if !fs::metadata(root).await.map(|m| m.is_dir()).unwrap_or(false) {
        return Err(AppError::File(FileError::DirectoryNotFound {
            path: root.display().to_string(),
        })
        .into());
    }

    let mut dirs: Vec<PathBuf> = Vec::new();
    let mut entries = fs::read_dir(root)
        .await
        .with_context(|| format!("无法读取数据集目录: {}", root.display()))?;

    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();

    let mut tasks = Vec::with_capacity(dirs.len());
    let mut next_id = 1u64;
    for dir in &dirs {
        match load_entry(next_id, dir).await {
            Ok(Some(task)) => {
                tracing::debug!(
                    "任务 {} ← {} ({}x{})",
                    task.id,
                    task.name,
                    task.width,
                    task.height
                );
                tasks.push(task);
                next_id += 1;
            }
            Ok(None) => {
                tracing::warn!("跳过不完整的数据目录: {}", dir.display());
            }
            Err(e) => {
                tracing::warn!("加载数据目录失败 {}: {:#}", dir.display(), e);
            }
        }
    }

    tracing::info!("从 {} 加载了 {} 个任务", root.display(), tasks.len());
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};
    use tempfile::tempdir;

    fn write_item(root: &Path, name: &str, (w, h): (u32, u32), prompt: Option<&str>) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        DynamicImage::ImageRgb8(RgbImage::new(w, h))
            .save(dir.join("input.png"))
            .unwrap();
        if let Some(prompt) = prompt {
            std::fs::write(dir.join(PROMPT_FILE), prompt).unwrap();
        }
    }

    #[tokio::test]
    async fn test_sorted_ids_and_dimensions() {
        let root = tempdir().unwrap();
        write_item(root.path(), "0002", (10, 20), Some("second"));
        write_item(root.path(), "0001", (30, 40), Some("  first \n"));
        write_item(root.path(), "0003", (5, 5), None);
        std::fs::write(root.path().join("README.txt"), "not a task").unwrap();

        let tasks = load_dataset(root.path()).await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!((tasks[0].id, tasks[0].name.as_str()), (1, "0001"));
        assert_eq!(tasks[0].prompt, "first");
        assert_eq!((tasks[0].width, tasks[0].height), (30, 40));
        assert_eq!((tasks[1].id, tasks[1].name.as_str()), (2, "0002"));
    }

    #[tokio::test]
    async fn test_missing_root_is_error() {
        let root = tempdir().unwrap();
        assert!(load_dataset(&root.path().join("nope")).await.is_err());
    }
}
