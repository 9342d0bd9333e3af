//! 分块存储
//!
//! 任务的结构按 `chunk_size` 切分成若干分块，每个分块存放在与其ID同名的键下，
//! 与任务共享同一个TTL。任务记录里的 [`ChunkMap`] 记录每个结构所在的分块。
//!
//! 合并Worker结果时按结构ID定位，与到达顺序无关:
//!
//! - 已有的结构: 在其 `models` 末尾追加 `{model, results}`
//! - 新结构: 放入当前未满的分块，没有则新建分块
//!
//! 任意时刻最多只有一个未满分块，分块一旦写满就不再接收新结构。
//!
//! 分块ID形如 `{task_id}:chunk:{序号}`，序号零填充，按字符串排序即创建顺序，
//! 因此分页顺序稳定，未满的分块总在最后一页。

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use cimm_core::models::{Chunk, ChunkMap, StructureDocument};
use cimm_core::traits::{StateStore, StateStoreExt};
use cimm_core::{CimmError, CimmResult};
use tracing::{debug, warn};

pub struct ChunkStore {
    store: Arc<dyn StateStore>,
    chunk_size: usize,
    ttl: Duration,
}

/// 一次合并的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// 追加到已有结构的结果块数
    pub appended: usize,
    /// 新放入分块的结构数
    pub inserted: usize,
    /// 已存在而被忽略的重复结果块数
    pub duplicates: usize,
}

impl ChunkStore {
    pub fn new(store: Arc<dyn StateStore>, chunk_size: usize, ttl: Duration) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
            ttl,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn chunk_id(task_id: &str, seq: usize) -> String {
        format!("{task_id}:chunk:{seq:06}")
    }

    fn distinct(chunks: &ChunkMap) -> usize {
        chunks.values().collect::<BTreeSet<_>>().len()
    }

    async fn load(&self, chunk_id: &str) -> CimmResult<Chunk> {
        match self.store.get_json::<Chunk>(chunk_id).await? {
            Some(chunk) => Ok(chunk),
            None => {
                warn!("分块 {} 不存在或已过期，按空分块处理", chunk_id);
                Ok(Chunk::new())
            }
        }
    }

    /// 把结构按顺序切分成页写入，返回结构ID到分块ID的映射
    pub async fn put_page(
        &self,
        task_id: &str,
        structures: Vec<StructureDocument>,
    ) -> CimmResult<ChunkMap> {
        let mut chunks = ChunkMap::new();
        let mut pending = structures.into_iter().peekable();
        let mut seq = 0;

        while pending.peek().is_some() {
            seq += 1;
            let chunk_id = Self::chunk_id(task_id, seq);
            let chunk: Chunk = pending
                .by_ref()
                .take(self.chunk_size)
                .map(|s| (s.structure, s))
                .collect();
            for structure in chunk.keys() {
                chunks.insert(*structure, chunk_id.clone());
            }
            self.store.set_json(&chunk_id, &chunk, self.ttl).await?;
            debug!("任务 {} 写入分块 {} ({} 个结构)", task_id, chunk_id, chunk.len());
        }

        Ok(chunks)
    }

    /// 读取全部结构，按结构ID升序
    pub async fn fetch_all(&self, chunks: &ChunkMap) -> CimmResult<Vec<StructureDocument>> {
        let mut loaded: HashMap<&str, Chunk> = HashMap::new();
        let mut structures = Vec::with_capacity(chunks.len());

        for (structure, chunk_id) in chunks {
            if !loaded.contains_key(chunk_id.as_str()) {
                let chunk = self.load(chunk_id).await?;
                loaded.insert(chunk_id.as_str(), chunk);
            }
            match loaded
                .get_mut(chunk_id.as_str())
                .and_then(|c| c.remove(structure))
            {
                Some(doc) => structures.push(doc),
                None => warn!("分块 {} 中缺少结构 {}", chunk_id, structure),
            }
        }

        Ok(structures)
    }

    /// 分块ID排序后的第 `page` 页 (从1开始)
    pub async fn fetch_page(
        &self,
        chunks: &ChunkMap,
        page: usize,
    ) -> CimmResult<Vec<StructureDocument>> {
        let ids: Vec<&String> = chunks.values().collect::<BTreeSet<_>>().into_iter().collect();
        if page == 0 || page > ids.len() {
            return Err(CimmError::PageNotFound {
                page,
                pages: ids.len(),
            });
        }

        let chunk = self.load(ids[page - 1]).await?;
        Ok(chunk.into_values().collect())
    }

    /// 合并一个作业返回的结构
    ///
    /// `chunks` 在原地更新；所有被修改的分块会重新写入并刷新TTL。
    pub async fn merge_results(
        &self,
        task_id: &str,
        chunks: &mut ChunkMap,
        finished: Vec<StructureDocument>,
        model: i64,
    ) -> CimmResult<MergeOutcome> {
        let mut outcome = MergeOutcome::default();
        let mut loaded: HashMap<String, Chunk> = HashMap::new();
        let mut partial = self.partial_chunk(chunks);
        let mut seq = Self::distinct(chunks);

        for mut structure in finished {
            let block = structure.take_results(model);
            let id = structure.structure;

            if let Some(chunk_id) = chunks.get(&id).cloned() {
                if !loaded.contains_key(&chunk_id) {
                    let chunk = self.load(&chunk_id).await?;
                    loaded.insert(chunk_id.clone(), chunk);
                }
                let Some(chunk) = loaded.get_mut(&chunk_id) else {
                    continue;
                };
                match chunk.get_mut(&id) {
                    Some(existing) => {
                        if existing.append_model_result(block) {
                            outcome.appended += 1;
                        } else {
                            outcome.duplicates += 1;
                        }
                    }
                    None => {
                        structure.models = vec![block];
                        chunk.insert(id, structure);
                        outcome.inserted += 1;
                    }
                }
                continue;
            }

            let chunk_id = match partial.take() {
                Some(chunk_id) => {
                    if !loaded.contains_key(&chunk_id) {
                        let chunk = self.load(&chunk_id).await?;
                        loaded.insert(chunk_id.clone(), chunk);
                    }
                    chunk_id
                }
                None => {
                    seq += 1;
                    let chunk_id = Self::chunk_id(task_id, seq);
                    loaded.insert(chunk_id.clone(), Chunk::new());
                    chunk_id
                }
            };

            let chunk = loaded.entry(chunk_id.clone()).or_default();
            structure.models = vec![block];
            chunk.insert(id, structure);
            chunks.insert(id, chunk_id.clone());
            outcome.inserted += 1;

            if chunk.len() < self.chunk_size {
                partial = Some(chunk_id);
            }
        }

        for (chunk_id, chunk) in &loaded {
            self.store.set_json(chunk_id, chunk, self.ttl).await?;
        }

        Ok(outcome)
    }

    /// 当前未满的分块
    fn partial_chunk(&self, chunks: &ChunkMap) -> Option<String> {
        let mut fill: HashMap<&String, usize> = HashMap::new();
        for chunk_id in chunks.values() {
            *fill.entry(chunk_id).or_default() += 1;
        }
        fill.into_iter()
            .filter(|(_, n)| *n < self.chunk_size)
            .map(|(id, _)| id.clone())
            .min()
    }
}
