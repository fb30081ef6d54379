use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::error::Result;
use crate::photo::ImageShape;

/// Images whose larger side exceeds this are planned fresh on every call.
pub const MAX_CACHED_SIDE: usize = 768;

/// Pixel layout an extraction plan was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgba8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlanKey {
    pub shape: ImageShape,
    pub format: PixelFormat,
}

impl PlanKey {
    pub fn rgba(shape: ImageShape) -> Self {
        PlanKey {
            shape,
            format: PixelFormat::Rgba8,
        }
    }
}

/// Memoizes per-shape extraction resources ("plans").
///
/// Owned by a single extractor. Unbounded unless a capacity is set, in which case the
/// oldest plan is evicted first. Shapes larger than [`MAX_CACHED_SIDE`] bypass the cache.
pub struct PlanCache<P> {
    plans: HashMap<PlanKey, Rc<P>>,
    insertion_order: VecDeque<PlanKey>,
    capacity: Option<usize>,
    total_builds: usize,
}

impl<P> Default for PlanCache<P> {
    fn default() -> Self {
        PlanCache::new(None)
    }
}

impl<P> PlanCache<P> {
    pub fn new(capacity: Option<usize>) -> Self {
        PlanCache {
            plans: HashMap::new(),
            insertion_order: VecDeque::new(),
            capacity,
            total_builds: 0,
        }
    }

    /// Returns the cached plan for `key` or builds one with `build`.
    pub fn get_or_build(&mut self, key: PlanKey, build: impl FnOnce(&PlanKey) -> Result<P>) -> Result<Rc<P>> {
        if let Some(plan) = self.plans.get(&key) {
            return Ok(Rc::clone(plan));
        }

        let plan = Rc::new(build(&key)?);
        self.total_builds += 1;
        if key.shape.max_side() > MAX_CACHED_SIDE || self.capacity == Some(0) {
            return Ok(plan);
        }

        if let Some(capacity) = self.capacity {
            while self.plans.len() >= capacity {
                match self.insertion_order.pop_front() {
                    Some(oldest) => {
                        self.plans.remove(&oldest);
                    }
                    None => break,
                }
            }
        }
        self.plans.insert(key, Rc::clone(&plan));
        self.insertion_order.push_back(key);
        Ok(plan)
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Drops every cached plan.
    pub fn clear(&mut self) {
        self.plans.clear();
        self.insertion_order.clear();
    }

    /// Number of plans built so far, cached or not.
    pub fn get_num_builds(&self) -> usize {
        self.total_builds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(width: usize, height: usize) -> PlanKey {
        PlanKey::rgba(ImageShape::new(width, height))
    }

    #[test]
    fn reuses_plans_per_shape() {
        let mut cache: PlanCache<usize> = PlanCache::default();
        let a = cache.get_or_build(key(48, 36), |k| Ok(k.shape.width)).unwrap();
        let b = cache.get_or_build(key(48, 36), |_| panic!("must not rebuild")).unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        cache.get_or_build(key(36, 48), |k| Ok(k.shape.width)).unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_num_builds(), 2);
    }

    #[test]
    fn large_shapes_bypass_the_cache() {
        let mut cache: PlanCache<usize> = PlanCache::default();
        cache.get_or_build(key(1024, 600), |_| Ok(1)).unwrap();
        cache.get_or_build(key(1024, 600), |_| Ok(1)).unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.get_num_builds(), 2);
    }

    #[test]
    fn bounded_cache_evicts_oldest() {
        let mut cache: PlanCache<usize> = PlanCache::new(Some(2));
        for width in [10, 20, 30] {
            cache.get_or_build(key(width, 10), |k| Ok(k.shape.width)).unwrap();
        }
        assert_eq!(cache.len(), 2);
        // 10 was evicted and must be rebuilt
        cache.get_or_build(key(10, 10), |k| Ok(k.shape.width)).unwrap();
        assert_eq!(cache.get_num_builds(), 4);
    }
}
