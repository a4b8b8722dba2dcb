use rayon::prelude::*;

#[inline(always)]
pub fn dot(va: &[f32], vb: &[f32]) -> f32 {
    va.iter().zip(vb).map(|(a, b)| a * b).sum()
}

#[inline(always)]
pub fn norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

/// 计算余弦相似度，结果位于 [-1, 1]
///
/// 任意一个向量的模为 0 时返回 0 而不是 NaN
pub fn cosine_similarity(va: &[f32], vb: &[f32]) -> f32 {
    cosine_with_norm(va, norm(va), vb)
}

/// `va_norm` 为预先计算好的 `norm(va)`
#[inline(always)]
fn cosine_with_norm(va: &[f32], va_norm: f32, vb: &[f32]) -> f32 {
    let denom = va_norm * norm(vb);
    if denom == 0. || !denom.is_finite() {
        return 0.;
    }
    (dot(va, vb) / denom).clamp(-1., 1.)
}

/// 计算 query 与所有向量的相似度，返回分数最高的 k 个 `(下标, 分数)`
///
/// 分数相同时保持原有顺序
pub fn top_k<'a, I>(query: &[f32], vectors: I, k: usize) -> Vec<(usize, f32)>
where
    I: IndexedParallelIterator<Item = &'a [f32]>,
{
    if k == 0 {
        return vec![];
    }
    let query_norm = norm(query);
    let scores = vectors
        .enumerate()
        .map(|(i, v)| (i, cosine_with_norm(query, query_norm, v)))
        .collect::<Vec<_>>();
    rank(scores, k)
}

/// 按分数从高到低稳定排序后保留前 k 个，-0.0 与 0.0 视为相同，NaN 排在最后
fn rank(mut scores: Vec<(usize, f32)>, k: usize) -> Vec<(usize, f32)> {
    let key = |s: f32| if s.is_nan() { f32::NEG_INFINITY } else { s + 0. };
    scores.sort_by(|a, b| key(b.1).total_cmp(&key(a.1)));
    scores.truncate(k);
    scores
}

#[cfg(test)]
mod tests {
    use rand::prelude::*;

    use super::*;

    const EPS: f32 = 1e-6;

    fn random_vector(rng: &mut impl Rng, dim: usize) -> Vec<f32> {
        (0..dim).map(|_| rng.random_range(-1.0..1.0)).collect()
    }

    #[test]
    fn test_cosine_self() {
        let mut rng = rand::rng();
        for _ in 0..100 {
            let v = random_vector(&mut rng, 15);
            assert!((cosine_similarity(&v, &v) - 1.).abs() < EPS);
        }
    }

    #[test]
    fn test_cosine_symmetric() {
        let mut rng = rand::rng();
        for _ in 0..100 {
            let a = random_vector(&mut rng, 15);
            let b = random_vector(&mut rng, 15);
            assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
            let s = cosine_similarity(&a, &b);
            assert!((-1. ..=1.).contains(&s));
        }
    }

    #[test]
    fn test_cosine_zero_norm() {
        let zero = [0f32; 4];
        let v = [1., 2., 3., 4.];
        assert_eq!(cosine_similarity(&zero, &v), 0.);
        assert_eq!(cosine_similarity(&v, &zero), 0.);
        assert_eq!(cosine_similarity(&zero, &zero), 0.);
    }

    #[test]
    fn test_cosine_known_values() {
        assert!((cosine_similarity(&[1., 0.], &[0., 1.])).abs() < EPS);
        assert!((cosine_similarity(&[1., 0.], &[-1., 0.]) + 1.).abs() < EPS);
        assert!((cosine_similarity(&[1., 1.], &[1., 0.]) - 0.5f32.sqrt()).abs() < EPS);
    }

    #[test]
    fn test_top_k_order() {
        let vectors = vec![vec![0., 1.], vec![1., 0.], vec![1., 1.], vec![-1., 0.]];
        let result = top_k(&[1., 0.], vectors.par_iter().map(|v| v.as_slice()), 10);
        let ids = result.iter().map(|r| r.0).collect::<Vec<_>>();
        assert_eq!(ids, &[1, 2, 0, 3]);
        assert!(result.windows(2).all(|w| w[0].1 >= w[1].1));
    }

    #[test]
    fn test_top_k_stable_ties() {
        // 0、2、4 分数相同，1、3 分数相同
        let vectors = vec![vec![1., 0.], vec![0., 1.], vec![2., 0.], vec![0., 3.], vec![5., 0.]];
        let result = top_k(&[1., 0.], vectors.par_iter().map(|v| v.as_slice()), 5);
        let ids = result.iter().map(|r| r.0).collect::<Vec<_>>();
        assert_eq!(ids, &[0, 2, 4, 1, 3]);
    }

    #[test]
    fn test_rank_signed_zero_ties() {
        let scores = vec![(0, -0.), (1, 0.5), (2, 0.), (3, -0.), (4, f32::NAN), (5, -0.5)];
        let ids = rank(scores, 6).iter().map(|r| r.0).collect::<Vec<_>>();
        assert_eq!(ids, &[1, 0, 2, 3, 5, 4]);
    }

    #[test]
    fn test_top_k_truncate() {
        let vectors = vec![vec![1., 0.]; 10];
        let result = top_k(&[1., 0.], vectors.par_iter().map(|v| v.as_slice()), 3);
        assert_eq!(result.len(), 3);
        assert!(top_k(&[1., 0.], vectors.par_iter().map(|v| v.as_slice()), 0).is_empty());
    }
}
