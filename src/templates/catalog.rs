//! Built-in message catalog, keyed `"<lang>.<message_key>"`.

pub(super) static TEMPLATES: &[(&str, &str)] = &[
    // ── English ─────────────────────────────────────────────────────
    (
        "en.welcome_ask_name",
        "Welcome to the trade desk! I can help you buy and sell across Africa. What is your full name?",
    ),
    (
        "en.ask_role",
        "Nice to meet you{% if name %}, {{ name }}{% endif %}! Are you a buyer, a seller, or both?",
    ),
    (
        "en.ask_company",
        "What is the name of your company{% if name %}, {{ name }}{% endif %}?",
    ),
    (
        "en.ask_country",
        "Which country is {% if company %}{{ company }}{% else %}your company{% endif %} based in?",
    ),
    (
        "en.ask_products",
        "{% if role == 'seller' or role == 'hybrid' %}Which products do you sell? You can also send a photo.{% else %}Which products are you looking to buy? You can also send a photo.{% endif %}",
    ),
    (
        "en.onboarding_complete",
        "You're all set{% if name %}, {{ name }}{% endif %}! {% if company %}{{ company }} is now registered. {% endif %}Tell me what you need, for example \"I need 50 tons of maize\".",
    ),
    (
        "en.setup_failed",
        "Sorry, we couldn't finish setting up your account. Please send your last message again.",
    ),
    (
        "en.voice_not_understood",
        "Sorry, I couldn't understand that voice note. Could you type your answer instead?",
    ),
    (
        "en.product_confirm",
        "I found a product in your photo: {{ name }}{% if category %} ({{ category }}){% endif %}.{% if description %} {{ description }}{% endif %} Shall I add it to your catalogue? Reply YES or NO.",
    ),
    (
        "en.product_saved",
        "Done! {{ name }} has been added to your catalogue.",
    ),
    ("en.product_discarded", "OK, I did not save that product."),
    (
        "en.confirm_yes_no",
        "Please reply YES to save {% if name %}{{ name }}{% else %}the product{% endif %} or NO to discard it.",
    ),
    (
        "en.request_published",
        "Your request {{ reference }} for {% if quantity %}{{ quantity }} {{ unit }} of {% endif %}{{ item }} is now live. We'll notify you when suppliers respond.",
    ),
    (
        "en.request_drafted",
        "I saved your request as draft {{ reference }}. Some details are missing, so please tell me the product, quantity and unit to publish it.",
    ),
    (
        "en.tracking_lookup",
        "Let me look up your shipment{% if name %}, {{ name }}{% endif %}. I'll get back to you shortly.",
    ),
    (
        "en.help",
        "Hi{% if name %} {{ name }}{% endif %}! I can post buying requests, add products from photos and track shipments. Just tell me what you need.{% if intent == 'contact_support' %} A member of our support team will also contact you soon.{% endif %}",
    ),
    // ── French ──────────────────────────────────────────────────────
    (
        "fr.welcome_ask_name",
        "Bienvenue sur la plateforme commerciale ! Je vous aide à acheter et vendre à travers l'Afrique. Quel est votre nom complet ?",
    ),
    (
        "fr.ask_role",
        "Enchanté{% if name %}, {{ name }}{% endif %} ! Êtes-vous acheteur, vendeur, ou les deux ?",
    ),
    (
        "fr.ask_company",
        "Quel est le nom de votre entreprise{% if name %}, {{ name }}{% endif %} ?",
    ),
    (
        "fr.ask_country",
        "Dans quel pays {% if company %}{{ company }} est-elle{% else %}votre entreprise est-elle{% endif %} basée ?",
    ),
    (
        "fr.ask_products",
        "{% if role == 'seller' or role == 'hybrid' %}Quels produits vendez-vous ? Vous pouvez aussi envoyer une photo.{% else %}Quels produits souhaitez-vous acheter ? Vous pouvez aussi envoyer une photo.{% endif %}",
    ),
    (
        "fr.onboarding_complete",
        "C'est prêt{% if name %}, {{ name }}{% endif %} ! {% if company %}{{ company }} est maintenant enregistrée. {% endif %}Dites-moi ce dont vous avez besoin, par exemple « J'ai besoin de 50 tonnes de maïs ».",
    ),
    (
        "fr.setup_failed",
        "Désolé, nous n'avons pas pu finaliser votre compte. Veuillez renvoyer votre dernier message.",
    ),
    (
        "fr.voice_not_understood",
        "Désolé, je n'ai pas compris ce message vocal. Pouvez-vous écrire votre réponse ?",
    ),
    (
        "fr.product_confirm",
        "J'ai trouvé un produit sur votre photo : {{ name }}{% if category %} ({{ category }}){% endif %}.{% if description %} {{ description }}{% endif %} Voulez-vous l'ajouter à votre catalogue ? Répondez OUI ou NON.",
    ),
    (
        "fr.product_saved",
        "C'est fait ! {{ name }} a été ajouté à votre catalogue.",
    ),
    ("fr.product_discarded", "D'accord, je n'ai pas enregistré ce produit."),
    (
        "fr.confirm_yes_no",
        "Répondez OUI pour enregistrer {% if name %}{{ name }}{% else %}le produit{% endif %} ou NON pour l'abandonner.",
    ),
    (
        "fr.request_published",
        "Votre demande {{ reference }} pour {% if quantity %}{{ quantity }} {{ unit }} de {% endif %}{{ item }} est maintenant en ligne. Nous vous préviendrons dès que des fournisseurs répondront.",
    ),
    (
        "fr.request_drafted",
        "J'ai enregistré votre demande en brouillon {{ reference }}. Il manque des informations : indiquez le produit, la quantité et l'unité pour la publier.",
    ),
    (
        "fr.tracking_lookup",
        "Je recherche votre expédition{% if name %}, {{ name }}{% endif %}. Je reviens vers vous rapidement.",
    ),
    (
        "fr.help",
        "Bonjour{% if name %} {{ name }}{% endif %} ! Je peux publier vos demandes d'achat, ajouter des produits à partir de photos et suivre vos expéditions. Dites-moi ce dont vous avez besoin.{% if intent == 'contact_support' %} Un membre de notre équipe d'assistance vous contactera bientôt.{% endif %}",
    ),
    // ── Swahili ─────────────────────────────────────────────────────
    (
        "sw.welcome_ask_name",
        "Karibu kwenye soko la biashara! Ninakusaidia kununua na kuuza kote Afrika. Jina lako kamili ni nani?",
    ),
    (
        "sw.ask_role",
        "Nimefurahi kukufahamu{% if name %}, {{ name }}{% endif %}! Wewe ni mnunuzi, muuzaji, au vyote viwili?",
    ),
    (
        "sw.ask_company",
        "Jina la kampuni yako ni nini{% if name %}, {{ name }}{% endif %}?",
    ),
    (
        "sw.ask_country",
        "{% if company %}{{ company }} iko{% else %}Kampuni yako iko{% endif %} katika nchi gani?",
    ),
    (
        "sw.ask_products",
        "{% if role == 'seller' or role == 'hybrid' %}Unauza bidhaa gani? Unaweza pia kutuma picha.{% else %}Unatafuta kununua bidhaa gani? Unaweza pia kutuma picha.{% endif %}",
    ),
    (
        "sw.onboarding_complete",
        "Tayari{% if name %}, {{ name }}{% endif %}! {% if company %}{{ company }} imesajiliwa. {% endif %}Niambie unachohitaji, kwa mfano \"Nahitaji tani 50 za mahindi\".",
    ),
    (
        "sw.setup_failed",
        "Samahani, hatukuweza kukamilisha akaunti yako. Tafadhali tuma ujumbe wako wa mwisho tena.",
    ),
    (
        "sw.voice_not_understood",
        "Samahani, sikuelewa ujumbe huo wa sauti. Tafadhali andika jibu lako.",
    ),
    (
        "sw.product_confirm",
        "Nimepata bidhaa kwenye picha yako: {{ name }}{% if category %} ({{ category }}){% endif %}.{% if description %} {{ description }}{% endif %} Niiongeze kwenye orodha yako? Jibu NDIYO au HAPANA.",
    ),
    (
        "sw.product_saved",
        "Imekamilika! {{ name }} imeongezwa kwenye orodha yako.",
    ),
    ("sw.product_discarded", "Sawa, sijahifadhi bidhaa hiyo."),
    (
        "sw.confirm_yes_no",
        "Tafadhali jibu NDIYO kuhifadhi {% if name %}{{ name }}{% else %}bidhaa{% endif %} au HAPANA kuiacha.",
    ),
    (
        "sw.request_published",
        "Ombi lako {{ reference }} la {% if quantity %}{{ unit }} {{ quantity }} za {% endif %}{{ item }} sasa liko hewani. Tutakujulisha wauzaji watakapojibu.",
    ),
    (
        "sw.request_drafted",
        "Nimehifadhi ombi lako kama rasimu {{ reference }}. Baadhi ya taarifa hazipo, tafadhali niambie bidhaa, kiasi na kipimo ili kulichapisha.",
    ),
    (
        "sw.tracking_lookup",
        "Ninatafuta mzigo wako{% if name %}, {{ name }}{% endif %}. Nitakujibu hivi punde.",
    ),
    (
        "sw.help",
        "Habari{% if name %} {{ name }}{% endif %}! Ninaweza kuchapisha maombi ya ununuzi, kuongeza bidhaa kutoka kwa picha na kufuatilia mizigo. Niambie unachohitaji.{% if intent == 'contact_support' %} Mhudumu wetu atawasiliana nawe hivi karibuni.{% endif %}",
    ),
    // ── Arabic ──────────────────────────────────────────────────────
    (
        "ar.welcome_ask_name",
        "مرحبا بك في منصة التجارة! أساعدك على البيع والشراء في جميع أنحاء أفريقيا. ما اسمك الكامل؟",
    ),
    (
        "ar.ask_role",
        "تشرفنا{% if name %} يا {{ name }}{% endif %}! هل أنت مشتر أم بائع أم كلاهما؟",
    ),
    (
        "ar.ask_company",
        "ما اسم شركتك{% if name %} يا {{ name }}{% endif %}؟",
    ),
    (
        "ar.ask_country",
        "في أي بلد يقع مقر {% if company %}{{ company }}{% else %}شركتك{% endif %}؟",
    ),
    (
        "ar.ask_products",
        "{% if role == 'seller' or role == 'hybrid' %}ما المنتجات التي تبيعها؟ يمكنك أيضا إرسال صورة.{% else %}ما المنتجات التي تريد شراءها؟ يمكنك أيضا إرسال صورة.{% endif %}",
    ),
    (
        "ar.onboarding_complete",
        "تم التسجيل{% if name %} يا {{ name }}{% endif %}! {% if company %}تم تسجيل {{ company }}. {% endif %}أخبرني بما تحتاجه، مثلا \"أحتاج 50 طنا من الذرة\".",
    ),
    (
        "ar.setup_failed",
        "عذرا، لم نتمكن من إكمال إعداد حسابك. يرجى إرسال رسالتك الأخيرة مرة أخرى.",
    ),
    (
        "ar.voice_not_understood",
        "عذرا، لم أفهم الرسالة الصوتية. هل يمكنك كتابة إجابتك؟",
    ),
    (
        "ar.product_confirm",
        "وجدت منتجا في صورتك: {{ name }}{% if category %} ({{ category }}){% endif %}.{% if description %} {{ description }}{% endif %} هل أضيفه إلى كتالوجك؟ أجب بنعم أو لا.",
    ),
    ("ar.product_saved", "تم! أضيف {{ name }} إلى كتالوجك."),
    ("ar.product_discarded", "حسنا، لم أحفظ هذا المنتج."),
    (
        "ar.confirm_yes_no",
        "يرجى الرد بنعم لحفظ {% if name %}{{ name }}{% else %}المنتج{% endif %} أو لا لتجاهله.",
    ),
    (
        "ar.request_published",
        "طلبك {{ reference }} لـ {% if quantity %}{{ quantity }} {{ unit }} من {% endif %}{{ item }} منشور الآن. سنخبرك عندما يرد الموردون.",
    ),
    (
        "ar.request_drafted",
        "حفظت طلبك كمسودة {{ reference }}. بعض التفاصيل ناقصة، يرجى إخباري بالمنتج والكمية والوحدة لنشره.",
    ),
    (
        "ar.tracking_lookup",
        "أبحث عن شحنتك{% if name %} يا {{ name }}{% endif %}. سأعود إليك قريبا.",
    ),
    (
        "ar.help",
        "مرحبا{% if name %} {{ name }}{% endif %}! يمكنني نشر طلبات الشراء وإضافة المنتجات من الصور وتتبع الشحنات. أخبرني بما تحتاجه.{% if intent == 'contact_support' %} سيتواصل معك أحد أعضاء فريق الدعم قريبا.{% endif %}",
    ),
];
