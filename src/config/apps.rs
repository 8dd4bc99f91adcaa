//! App display name to launch target mapping.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::device::Platform;

/// Launch targets for one app.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppEntry {
    /// Android package name.
    pub package: &'static str,
    /// HarmonyOS bundle name, when the app ships a native build.
    pub bundle: Option<&'static str>,
}

const fn app(package: &'static str, bundle: Option<&'static str>) -> AppEntry {
    AppEntry { package, bundle }
}

/// Known apps keyed by lowercase display name.
pub static APP_CATALOG: Lazy<HashMap<&'static str, AppEntry>> = Lazy::new(|| {
    let mut m = HashMap::new();

    // System
    let settings = app("com.android.settings", Some("com.huawei.hmos.settings"));
    m.insert("settings", settings);
    m.insert("system settings", settings);
    m.insert("android system settings", settings);
    m.insert("设置", settings);

    let camera = app("com.android.camera", Some("com.huawei.hmos.camera"));
    m.insert("camera", camera);
    m.insert("相机", camera);

    let gallery = app("com.android.gallery3d", Some("com.huawei.hmos.photos"));
    m.insert("gallery", gallery);
    m.insert("photos", gallery);
    m.insert("图库", gallery);

    let clock = app("com.android.deskclock", Some("com.huawei.hmos.clock"));
    m.insert("clock", clock);
    m.insert("时钟", clock);

    let calendar = app("com.android.calendar", Some("com.huawei.hmos.calendar"));
    m.insert("calendar", calendar);
    m.insert("日历", calendar);

    let calculator = app("com.android.calculator2", Some("com.huawei.hmos.calculator"));
    m.insert("calculator", calculator);
    m.insert("计算器", calculator);

    let contacts = app("com.android.contacts", Some("com.ohos.contacts"));
    m.insert("contacts", contacts);
    m.insert("联系人", contacts);

    let messages = app("com.android.mms", Some("com.ohos.mms"));
    m.insert("messages", messages);
    m.insert("短信", messages);

    m.insert("phone", app("com.android.dialer", None));
    m.insert("files", app("com.android.fileexplorer", Some("com.huawei.hmos.files")));
    m.insert("file manager", app("com.android.fileexplorer", Some("com.huawei.hmos.files")));
    m.insert("audiorecorder", app("com.android.soundrecorder", None));
    m.insert("chrome", app("com.android.chrome", None));
    m.insert("google chrome", app("com.android.chrome", None));
    m.insert("browser", app("com.android.browser", Some("com.huawei.hmos.browser")));

    // Google
    m.insert("gmail", app("com.google.android.gm", None));
    m.insert("maps", app("com.google.android.apps.maps", None));
    m.insert("google maps", app("com.google.android.apps.maps", None));
    m.insert("youtube", app("com.google.android.youtube", None));

    // Social & messaging
    let wechat = app("com.tencent.mm", Some("com.tencent.wechat"));
    m.insert("wechat", wechat);
    m.insert("微信", wechat);
    m.insert("qq", app("com.tencent.mobileqq", None));
    m.insert("微博", app("com.sina.weibo", None));
    m.insert("小红书", app("com.xingin.xhs", None));
    m.insert("知乎", app("com.zhihu.android", None));

    // Shopping & services
    m.insert("淘宝", app("com.taobao.taobao", None));
    m.insert("京东", app("com.jingdong.app.mall", None));
    m.insert("拼多多", app("com.xunmeng.pinduoduo", None));
    m.insert("美团", app("com.sankuai.meituan", None));
    m.insert("饿了么", app("me.ele", None));
    m.insert("高德地图", app("com.autonavi.minimap", None));
    m.insert("携程", app("ctrip.android.view", None));
    m.insert("booking", app("com.booking", None));
    m.insert("booking.com", app("com.booking", None));
    m.insert("expedia", app("com.expedia.bookings", None));

    // Media
    m.insert("bilibili", app("tv.danmaku.bili", None));
    m.insert("抖音", app("com.ss.android.ugc.aweme", None));
    m.insert("网易云音乐", app("com.netease.cloudmusic", None));

    // Productivity
    m.insert("飞书", app("com.ss.android.lark", None));
    m.insert("duolingo", app("com.duolingo", None));
    m.insert("broccoli", app("com.flauschcode.broccoli", None));
    m.insert("bluecoins", app("com.rammigsoftware.bluecoins", None));

    m
});

/// Resolve an app name to the launch target for `platform`.
///
/// Names that already look like a package (`com.example.app`) are passed
/// through unchanged.
pub fn resolve_app(app_name: &str, platform: Platform) -> Option<String> {
    let name = app_name.trim();
    if name.is_empty() {
        return None;
    }

    let key = name.to_lowercase();
    if let Some(entry) = APP_CATALOG.get(key.as_str()) {
        return match platform {
            Platform::Android => Some(entry.package.to_string()),
            Platform::Harmony => entry.bundle.map(str::to_string),
        };
    }

    looks_like_package(name).then(|| name.to_string())
}

fn looks_like_package(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() >= 2
        && parts.iter().all(|p| {
            !p.is_empty() && p.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_app() {
        assert_eq!(
            resolve_app("Settings", Platform::Android).as_deref(),
            Some("com.android.settings")
        );
        assert_eq!(
            resolve_app("设置", Platform::Harmony).as_deref(),
            Some("com.huawei.hmos.settings")
        );
        assert_eq!(resolve_app("微信", Platform::Android).as_deref(), Some("com.tencent.mm"));
        assert_eq!(resolve_app("NonExistent", Platform::Android), None);
    }

    #[test]
    fn test_package_names_pass_through() {
        assert_eq!(
            resolve_app("org.example.notes", Platform::Android).as_deref(),
            Some("org.example.notes")
        );
        assert_eq!(resolve_app("booking.com", Platform::Android).as_deref(), Some("com.booking"));
        assert_eq!(resolve_app("Dr. Who", Platform::Android), None);
    }

    #[test]
    fn test_android_only_app_on_harmony() {
        assert_eq!(resolve_app("bilibili", Platform::Harmony), None);
    }
}
