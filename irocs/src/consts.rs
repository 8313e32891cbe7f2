//! 通用常量.

/// 标签值.
pub mod label {
    /// 分割结果中, 未分配 (或细胞边界) 体素的标签值.
    pub const UNASSIGNED: i32 = 0;

    /// 分割结果中, 背景的标签值. 按照约定, 体积最大的连通区域被强制设置为该值.
    pub const BACKGROUND: i32 = 1;

    /// 细胞核标注中, 表皮 (epidermis) 细胞核的标签值.
    pub const EPIDERMIS: i32 = 2;

    /// 体素是否属于前景?
    ///
    /// 前景被定义为标签值大于 0 且不等于 `background_label` 的体素.
    #[inline]
    pub const fn is_foreground(p: i32, background_label: i32) -> bool {
        p > UNASSIGNED && p != background_label
    }

    /// 细胞核是否是表皮细胞核?
    #[inline]
    pub const fn is_epidermis(p: i32) -> bool {
        matches!(p, EPIDERMIS)
    }
}

/// 拟合根坐标系所需要的最少点数.
pub const MIN_SHELL_POINTS: usize = 10;

/// 基于细胞核拟合根坐标系所需要的最少表皮细胞核数.
pub const MIN_EPIDERMIS_MARKERS: usize = 4;

#[cfg(test)]
mod tests {
    use super::label::*;

    #[test]
    fn test_foreground_excludes_background_and_zero() {
        assert!(!is_foreground(0, BACKGROUND));
        assert!(!is_foreground(BACKGROUND, BACKGROUND));
        assert!(is_foreground(2, BACKGROUND));
        assert!(is_foreground(1, 7));
        assert!(!is_foreground(-3, BACKGROUND));
    }
}
