//! 根表面三角网格.

use crate::axis::AxisModel;
use crate::error::ConfigError;
use crate::Vec3;

/// 最少纬线数.
pub const MIN_LATITUDES: usize = 2;

/// 最少经线数.
pub const MIN_LONGITUDES: usize = 3;

/// 检查网格采样密度.
#[inline]
pub fn check_sampling(n_latitudes: usize, n_longitudes: usize) -> Result<(), ConfigError> {
    if n_latitudes < MIN_LATITUDES || n_longitudes < MIN_LONGITUDES {
        Err(ConfigError::MeshSampling(n_latitudes, n_longitudes))
    } else {
        Ok(())
    }
}

/// 根表面网格.
///
/// 顶点按 `(纬线, 经线)` 行优先排列, 纬线沿根轴按弧长等分, 经线绕根轴等角度分布.
/// 每个纬线带由 `2 * n_longitudes` 个三角形组成.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SurfaceMesh {
    /// 顶点 (µm).
    pub vertices: Vec<Vec3>,

    /// 单位法向量, 与顶点一一对应.
    pub normals: Vec<Vec3>,

    /// 三角形顶点下标.
    pub indices: Vec<[u32; 3]>,
}

impl SurfaceMesh {
    /// 由根轴重新生成网格.
    pub fn build(axis: &AxisModel, n_latitudes: usize, n_longitudes: usize) -> Self {
        let length = axis.length_um();
        let mut vertices = Vec::with_capacity(n_latitudes * n_longitudes);
        let mut normals = Vec::with_capacity(n_latitudes * n_longitudes);

        for i in 0..n_latitudes {
            let u = axis.u_at_arc(length * i as f64 / (n_latitudes - 1) as f64);
            let center = axis.position(u);
            let (_, n, b) = axis.frame(u);
            let (ra, rb) = (axis.radius_n(u), axis.radius_b(u));
            for j in 0..n_longitudes {
                let phi = std::f64::consts::TAU * j as f64 / n_longitudes as f64;
                let (s, c) = phi.sin_cos();
                let r = crate::axis::ellipse_radius(ra, rb, phi);
                vertices.push(center + (n * c + b * s) * r);

                // 椭圆隐式方程 (x/a)² + (y/b)² = 1 的梯度方向.
                let normal = if ra > f64::EPSILON && rb > f64::EPSILON {
                    n * (c / (ra * ra)) + b * (s / (rb * rb))
                } else {
                    n * c + b * s
                };
                normals.push(normal.normalize());
            }
        }

        let mut indices = Vec::with_capacity(2 * (n_latitudes - 1) * n_longitudes);
        let at = |i: usize, j: usize| (i * n_longitudes + j % n_longitudes) as u32;
        for i in 0..n_latitudes - 1 {
            for j in 0..n_longitudes {
                indices.push([at(i, j), at(i + 1, j), at(i, j + 1)]);
                indices.push([at(i, j + 1), at(i + 1, j), at(i + 1, j + 1)]);
            }
        }

        Self {
            vertices,
            normals,
            indices,
        }
    }

    /// 是否没有任何顶点?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// 三角形个数.
    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.indices.len()
    }
}
